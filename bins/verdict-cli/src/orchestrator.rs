//! Generation Orchestrator
//!
//! Runs many independent generation units through a bounded pool with
//! the same shape as the verification scheduler:
//!
//! 1. Drop units whose identity was already seen in this batch
//! 2. Skip units whose output file already exists
//! 3. Call the generator under the retry policy
//! 4. Write the result, or a degraded empty record when retries give out
//!
//! A unit never fails the batch. Progress is one log line per finished
//! unit and the batch ends with a [`GenerationSummary`].

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, warn};
use verdict_common::store::{exercise_output_path, prompt_output_path, write_jsonl};
use verdict_common::types::{Exercise, ExerciseSolutions, ExerciseTests};

use crate::exercises::generator_to_exercises;
use crate::generator::{GenerationError, Generator};
use crate::retry::{retry, RetryOutcome, RetryPolicy};

/// One independent piece of generation work
#[derive(Debug, Clone)]
pub enum WorkUnit {
    /// Prompt whose output is parsed into exercises
    Prompt(String),
    Solutions(Exercise),
    Tests(Exercise),
}

impl WorkUnit {
    fn kind(&self) -> &'static str {
        match self {
            WorkUnit::Prompt(_) => "prompt",
            WorkUnit::Solutions(_) => "solutions",
            WorkUnit::Tests(_) => "tests",
        }
    }

    /// Text that decides both dedup and the output path
    fn identity(&self) -> &str {
        match self {
            WorkUnit::Prompt(prompt) => prompt,
            WorkUnit::Solutions(exercise) | WorkUnit::Tests(exercise) => &exercise.exercise_id,
        }
    }

    pub fn output_path(&self, dir: &Path) -> Result<PathBuf> {
        match self {
            WorkUnit::Prompt(prompt) => Ok(prompt_output_path(dir, prompt)),
            WorkUnit::Solutions(exercise) | WorkUnit::Tests(exercise) => {
                exercise_output_path(dir, &exercise.exercise_id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub pool_size: usize,
    pub retry: RetryPolicy,
    /// Solutions or tests requested per exercise
    pub samples: usize,
}

/// Per-batch counts; every submitted unit lands in exactly one bucket
/// except in-batch duplicates, which are counted as skipped
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSummary {
    pub generated: usize,
    pub skipped: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl GenerationSummary {
    pub fn total(&self) -> usize {
        self.generated + self.skipped + self.degraded + self.failed
    }
}

impl fmt::Display for GenerationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} generated, {} skipped, {} degraded, {} failed",
            self.generated, self.skipped, self.degraded, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Generated,
    Skipped,
    Degraded,
    Failed,
}

pub struct Orchestrator<G: ?Sized> {
    generator: Arc<G>,
    settings: OrchestratorSettings,
    out_dir: PathBuf,
}

impl<G> Orchestrator<G>
where
    G: Generator + ?Sized + 'static,
{
    pub fn new(generator: Arc<G>, settings: OrchestratorSettings, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            settings,
            out_dir: out_dir.into(),
        }
    }

    pub async fn run(&self, units: Vec<WorkUnit>) -> GenerationSummary {
        let mut summary = GenerationSummary::default();

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(units.len());
        for unit in units {
            if seen.insert((unit.kind(), unit.identity().to_string())) {
                unique.push(unit);
            } else {
                summary.skipped += 1;
            }
        }
        if summary.skipped > 0 {
            info!(duplicates = summary.skipped, "Duplicate units dropped before submission");
        }

        let total = unique.len();
        let pool_size = self.settings.pool_size.max(1);
        info!(units = total, pool_size, "Generation units are submitted");

        let mut completions = stream::iter(unique)
            .map(|unit| {
                let generator = Arc::clone(&self.generator);
                let settings = self.settings;
                let path = unit.output_path(&self.out_dir);
                tokio::spawn(async move {
                    match path {
                        Ok(path) => process_unit(generator.as_ref(), &unit, &settings, &path).await,
                        Err(e) => {
                            error!(kind = unit.kind(), "Unit rejected: {:#}", e);
                            UnitOutcome::Failed
                        }
                    }
                })
            })
            .buffer_unordered(pool_size);

        let mut done = 0;
        while let Some(joined) = completions.next().await {
            done += 1;
            let outcome = joined.unwrap_or_else(|e| {
                error!(error = %e, "Generation task failed");
                UnitOutcome::Failed
            });
            match outcome {
                UnitOutcome::Generated => summary.generated += 1,
                UnitOutcome::Skipped => summary.skipped += 1,
                UnitOutcome::Degraded => summary.degraded += 1,
                UnitOutcome::Failed => summary.failed += 1,
            }
            info!("[{}/{}] generation completed", done, total);
        }

        info!(%summary, "Generation finished");
        summary
    }
}

async fn process_unit<G>(
    generator: &G,
    unit: &WorkUnit,
    settings: &OrchestratorSettings,
    path: &Path,
) -> UnitOutcome
where
    G: Generator + ?Sized,
{
    if path.exists() {
        info!("Skip {} generation because it already exists", path.display());
        return UnitOutcome::Skipped;
    }

    let written = match unit {
        WorkUnit::Prompt(prompt) => {
            let outcome = retry(&settings.retry, GenerationError::is_transient, |_| {
                generator.generate(prompt)
            })
            .await;
            match succeeded(outcome, unit) {
                Some(generated) => {
                    let exercises = generator_to_exercises(&generated.output);
                    if exercises.is_empty() {
                        warn!("Generation for prompt produced no usable exercise");
                    }
                    write_jsonl(path, &exercises).map(|_| UnitOutcome::Generated)
                }
                None => write_jsonl(
                    path,
                    &[Exercise {
                        exercise_id: String::new(),
                        problem: prompt.clone(),
                        solution: String::new(),
                    }],
                )
                .map(|_| UnitOutcome::Degraded),
            }
        }
        WorkUnit::Solutions(exercise) => {
            let outcome = retry(&settings.retry, GenerationError::is_transient, |_| {
                generator.generate_solutions(exercise, settings.samples)
            })
            .await;
            match succeeded(outcome, unit) {
                Some(solutions) => write_jsonl(path, &[solutions]).map(|_| UnitOutcome::Generated),
                None => write_jsonl(
                    path,
                    &[ExerciseSolutions {
                        exercise_id: exercise.exercise_id.clone(),
                        problem: exercise.problem.clone(),
                        solutions: Vec::new(),
                    }],
                )
                .map(|_| UnitOutcome::Degraded),
            }
        }
        WorkUnit::Tests(exercise) => {
            let outcome = retry(&settings.retry, GenerationError::is_transient, |_| {
                generator.generate_tests(exercise, settings.samples)
            })
            .await;
            match succeeded(outcome, unit) {
                Some(tests) => write_jsonl(path, &[tests]).map(|_| UnitOutcome::Generated),
                None => write_jsonl(
                    path,
                    &[ExerciseTests {
                        exercise_id: exercise.exercise_id.clone(),
                        problem: exercise.problem.clone(),
                        tests: Vec::new(),
                    }],
                )
                .map(|_| UnitOutcome::Degraded),
            }
        }
    };

    written.unwrap_or_else(|e| {
        error!("Failed to write {}: {:#}", path.display(), e);
        UnitOutcome::Failed
    })
}

/// Value of a successful outcome, logging why there is none otherwise
fn succeeded<T>(outcome: RetryOutcome<T, GenerationError>, unit: &WorkUnit) -> Option<T> {
    match outcome {
        RetryOutcome::Succeeded(value) => Some(value),
        RetryOutcome::Exhausted(e) => {
            warn!(kind = unit.kind(), "Generation failed after all retries, skipping: {}", e);
            None
        }
        RetryOutcome::Aborted(e) => {
            warn!(kind = unit.kind(), "Generation aborted, skipping: {}", e);
            None
        }
    }
}
