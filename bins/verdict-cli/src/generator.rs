//! Generator capability
//!
//! Everything the orchestrator needs from a text-generation backend, kept
//! dyn-compatible with boxed futures. Two implementations ship:
//! [`StubGenerator`] for offline runs and tests, [`TgiGenerator`] for a
//! text-generation-inference HTTP endpoint.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::try_join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use verdict_common::assertions::function_name;
use verdict_common::types::{Exercise, ExerciseSolutions, ExerciseTests};

/// Boxed future returned by every [`Generator`] method
pub type GenerationFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, GenerationError>> + Send + 'a>>;

/// Why a generation call failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Worth retrying: network trouble, throttling, server errors
    Transient(String),
    /// Retrying cannot help: bad request, unusable input
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Transient(msg) => write!(f, "transient generation error: {}", msg),
            GenerationError::Fatal(msg) => write!(f, "fatal generation error: {}", msg),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Raw output for one exercise-generation prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub prompt: String,
    pub output: String,
}

pub trait Generator: Send + Sync {
    /// Free-form generation; the output is parsed into exercises
    fn generate<'a>(&'a self, prompt: &'a str) -> GenerationFuture<'a, Generated>;

    /// `n` independent completions of the exercise problem
    fn generate_solutions<'a>(
        &'a self,
        exercise: &'a Exercise,
        n: usize,
    ) -> GenerationFuture<'a, ExerciseSolutions>;

    /// `n` independent continuations of the exercise's test prompt
    fn generate_tests<'a>(
        &'a self,
        exercise: &'a Exercise,
        n: usize,
    ) -> GenerationFuture<'a, ExerciseTests>;
}

/// Prompt asking the model to continue with an assertion about `entry_point`
pub fn test_prompt(problem: &str, entry_point: &str) -> String {
    format!(
        "{}\n    pass\n\n# check the correctness of {}\nassert ",
        problem, entry_point
    )
}

fn entry_point_of(exercise: &Exercise) -> Result<&str, GenerationError> {
    function_name(&exercise.problem).ok_or_else(|| {
        GenerationError::Fatal(format!(
            "exercise {} defines no function",
            exercise.exercise_id
        ))
    })
}

/// Deterministic offline generator
///
/// The first `transient_failures` calls fail with a transient error; with
/// `fatal` set every call fails fatally.
#[derive(Debug, Default)]
pub struct StubGenerator {
    n_functions: usize,
    transient_failures: usize,
    fatal: bool,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new(n_functions: usize) -> Self {
        Self {
            n_functions,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_transient_failures(mut self, count: usize) -> Self {
        self.transient_failures = count;
        self
    }

    #[cfg(test)]
    pub fn always_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    #[cfg(test)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(GenerationError::Fatal("stub configured to fail".into()));
        }
        if call < self.transient_failures {
            return Err(GenerationError::Transient(format!("stub failure {}", call + 1)));
        }
        Ok(())
    }
}

impl Generator for StubGenerator {
    fn generate<'a>(&'a self, prompt: &'a str) -> GenerationFuture<'a, Generated> {
        Box::pin(async move {
            self.check_failure()?;
            let output = (0..self.n_functions)
                .map(|i| {
                    format!(
                        "def stub_{i}():\n    \"\"\"Return the number {i}.\"\"\"\n    return {i}\n\n"
                    )
                })
                .collect();
            Ok(Generated {
                prompt: prompt.to_string(),
                output,
            })
        })
    }

    fn generate_solutions<'a>(
        &'a self,
        exercise: &'a Exercise,
        n: usize,
    ) -> GenerationFuture<'a, ExerciseSolutions> {
        Box::pin(async move {
            self.check_failure()?;
            Ok(ExerciseSolutions {
                exercise_id: exercise.exercise_id.clone(),
                problem: exercise.problem.clone(),
                solutions: (0..n).map(|i| format!("\n    return {}", i)).collect(),
            })
        })
    }

    fn generate_tests<'a>(
        &'a self,
        exercise: &'a Exercise,
        n: usize,
    ) -> GenerationFuture<'a, ExerciseTests> {
        Box::pin(async move {
            self.check_failure()?;
            let entry_point = entry_point_of(exercise)?;
            Ok(ExerciseTests {
                exercise_id: exercise.exercise_id.clone(),
                problem: test_prompt(&exercise.problem, entry_point),
                tests: (0..n).map(|_| format!("{}() == 0", entry_point)).collect(),
            })
        })
    }
}

const STOP_SEQUENCES: &[&str] = &["\ndef", "\n#", "\n```"];

#[derive(Serialize)]
struct TgiRequest<'a> {
    inputs: &'a str,
    parameters: TgiParameters<'a>,
}

#[derive(Serialize)]
struct TgiParameters<'a> {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    do_sample: bool,
    stop: &'a [&'a str],
}

#[derive(Deserialize)]
struct TgiResponse {
    generated_text: String,
}

/// Client for a text-generation-inference `/generate` endpoint
pub struct TgiGenerator {
    client: Client,
    url: String,
    max_new_tokens: u32,
}

impl TgiGenerator {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/generate", base_url.trim_end_matches('/')),
            max_new_tokens: 512,
        }
    }

    async fn complete(&self, inputs: &str) -> Result<String, GenerationError> {
        let body = TgiRequest {
            inputs,
            parameters: TgiParameters {
                max_new_tokens: self.max_new_tokens,
                temperature: 1.0,
                top_p: 0.95,
                do_sample: true,
                stop: STOP_SEQUENCES,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transient(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = format!("endpoint returned {}: {}", status.as_u16(), text);
            return Err(if is_transient_status(status) {
                GenerationError::Transient(message)
            } else {
                GenerationError::Fatal(message)
            });
        }

        let parsed: TgiResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Fatal(format!("unexpected response body: {}", e)))?;
        Ok(parsed.generated_text)
    }

    async fn complete_n(&self, inputs: &str, n: usize) -> Result<Vec<String>, GenerationError> {
        try_join_all((0..n).map(|_| self.complete(inputs))).await
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

impl Generator for TgiGenerator {
    fn generate<'a>(&'a self, prompt: &'a str) -> GenerationFuture<'a, Generated> {
        Box::pin(async move {
            // Prime the model to open a function definition
            let text = self.complete(&format!("{}\ndef", prompt)).await?;
            Ok(Generated {
                prompt: prompt.to_string(),
                output: format!("def{}", text),
            })
        })
    }

    fn generate_solutions<'a>(
        &'a self,
        exercise: &'a Exercise,
        n: usize,
    ) -> GenerationFuture<'a, ExerciseSolutions> {
        Box::pin(async move {
            let solutions = self.complete_n(&exercise.problem, n).await?;
            Ok(ExerciseSolutions {
                exercise_id: exercise.exercise_id.clone(),
                problem: exercise.problem.clone(),
                solutions,
            })
        })
    }

    fn generate_tests<'a>(
        &'a self,
        exercise: &'a Exercise,
        n: usize,
    ) -> GenerationFuture<'a, ExerciseTests> {
        Box::pin(async move {
            let entry_point = entry_point_of(exercise)?;
            let problem = test_prompt(&exercise.problem, entry_point);
            let tests = self.complete_n(&problem, n).await?;
            Ok(ExerciseTests {
                exercise_id: exercise.exercise_id.clone(),
                problem,
                tests,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise() -> Exercise {
        Exercise {
            exercise_id: "ex1".into(),
            problem: "def answer():\n    \"\"\"Return zero.\"\"\"".into(),
            solution: "\n    return 0".into(),
        }
    }

    #[tokio::test]
    async fn test_stub_generator_outputs() {
        let generator = StubGenerator::new(2);

        let generated = generator.generate("write code").await.unwrap();
        assert_eq!(generated.output.matches("def stub_").count(), 2);

        let solutions = generator.generate_solutions(&exercise(), 3).await.unwrap();
        assert_eq!(solutions.solutions.len(), 3);

        let tests = generator.generate_tests(&exercise(), 2).await.unwrap();
        assert_eq!(tests.tests, vec!["answer() == 0", "answer() == 0"]);
        assert!(tests.problem.ends_with("# check the correctness of answer\nassert "));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_stub_failure_injection() {
        let generator = StubGenerator::new(1).with_transient_failures(2);
        assert!(generator.generate("p").await.unwrap_err().is_transient());
        assert!(generator.generate("p").await.unwrap_err().is_transient());
        assert!(generator.generate("p").await.is_ok());

        let generator = StubGenerator::new(1).always_fatal();
        let err = generator.generate("p").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_tests_need_an_entry_point() {
        let generator = StubGenerator::new(1);
        let mut exercise = exercise();
        exercise.problem = "x = 1".into();

        let err = generator.generate_tests(&exercise, 1).await.unwrap_err();
        assert!(matches!(err, GenerationError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let generator = TgiGenerator::new("http://127.0.0.1:9/");
        let err = generator.generate("p").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNPROCESSABLE_ENTITY));
    }
}
