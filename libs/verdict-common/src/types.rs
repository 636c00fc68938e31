use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// How statements of one job are laid out over interpreter processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One process runs the program and every statement in order.
    /// The timeout is the budget for the whole statement list.
    #[default]
    Shared,
    /// A fresh process per statement, each with its own timeout.
    Isolated,
}

impl ExecutionMode {
    /// Parse a mode from string (case-insensitive)
    pub fn parse(s: &str) -> Option<ExecutionMode> {
        match s.to_lowercase().as_str() {
            "shared" => Some(ExecutionMode::Shared),
            "isolated" => Some(ExecutionMode::Isolated),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Shared => write!(f, "shared"),
            ExecutionMode::Isolated => write!(f, "isolated"),
        }
    }
}

/// What `passed` means for an execution result
///
/// Two readings exist in the pipeline:
/// - `Completed`: the run finished without a fatal error or timeout,
///   whatever the individual assertions returned. Consensus selection
///   then ranks by assertion count. Default for test-case verification.
/// - `AllAssertions`: the run finished and every assertion held.
///   Used when a single hand-written check suite decides correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PassCriterion {
    #[default]
    Completed,
    AllAssertions,
}

impl PassCriterion {
    pub fn parse(s: &str) -> Option<PassCriterion> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "completed" => Some(PassCriterion::Completed),
            "all_assertions" | "all" => Some(PassCriterion::AllAssertions),
            _ => None,
        }
    }
}

impl fmt::Display for PassCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassCriterion::Completed => write!(f, "completed"),
            PassCriterion::AllAssertions => write!(f, "all_assertions"),
        }
    }
}

/// Candidate solution for a task (Immutable Input)
/// Dedup identity is the exact `(task_id, completion)` text pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub task_id: String,
    pub prompt: String,
    #[serde(alias = "candidate_text")]
    pub completion: String,
}

/// Test source record
///
/// A `tests` list is one originating generation batch; a lone
/// `assertion` is a batch of one. The per-batch cap is applied
/// before batches are unioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestRecord {
    Batch { task_id: String, tests: Vec<String> },
    Single { task_id: String, assertion: String },
}

impl TestRecord {
    pub fn task_id(&self) -> &str {
        match self {
            TestRecord::Batch { task_id, .. } | TestRecord::Single { task_id, .. } => task_id,
        }
    }
}

/// Assertion batches grouped by task, in arrival order
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    batches: HashMap<String, Vec<Vec<String>>>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TestRecord>,
    {
        let mut suite = Self::new();
        for record in records {
            match record {
                TestRecord::Batch { task_id, tests } => suite.add_batch(task_id, tests),
                TestRecord::Single { task_id, assertion } => {
                    suite.add_batch(task_id, vec![assertion])
                }
            }
        }
        suite
    }

    pub fn add_batch(&mut self, task_id: impl Into<String>, tests: Vec<String>) {
        self.batches.entry(task_id.into()).or_default().push(tests);
    }

    pub fn task_count(&self) -> usize {
        self.batches.len()
    }

    /// Effective test set for a task
    ///
    /// Each batch is truncated to `limit` first, then batches are
    /// unioned. Duplicates are dropped, first-seen order is kept so
    /// outcome vectors line up across runs.
    pub fn effective_tests(&self, task_id: &str, limit: Option<usize>) -> Vec<String> {
        let Some(batches) = self.batches.get(task_id) else {
            return Vec::new();
        };

        let mut seen = std::collections::HashSet::new();
        let mut tests = Vec::new();
        for batch in batches {
            let cap = limit.unwrap_or(batch.len()).min(batch.len());
            for test in &batch[..cap] {
                if seen.insert(test.as_str()) {
                    tests.push(test.clone());
                }
            }
        }
        tests
    }
}

/// Verification Job (Immutable)
/// One candidate paired with the tests it must satisfy
///
/// ## Statement Semantics:
/// - `tests` holds assertion expressions, each run as `assert <expr>`;
///   entries that are already `assert` statements run unchanged
/// - when `test_code` is set, the program also carries that code and a
///   single `check(<entry_point>)` statement replaces the assertions
/// - `timeout_ms` applies to the whole list in shared mode and to each
///   statement in isolated mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub task_id: String,
    pub prompt: String,
    pub completion: String,
    pub tests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_code: Option<String>,
    pub timeout_ms: u64,
}

impl VerificationJob {
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.task_id, &self.completion)
    }

    /// Full program source: prompt, completion and optional check code
    pub fn program(&self) -> String {
        let mut program = format!("{}{}", self.prompt, self.completion);
        if let Some(test_code) = &self.test_code {
            program.push('\n');
            program.push_str(test_code);
            program.push('\n');
        }
        program
    }

    /// Statements executed after the program, in submitted order
    pub fn statements(&self) -> Vec<String> {
        match (&self.test_code, &self.entry_point) {
            (Some(_), Some(entry_point)) => vec![format!("check({})", entry_point)],
            _ => self.tests.iter().map(|t| assert_statement(t)).collect(),
        }
    }
}

fn assert_statement(test: &str) -> String {
    let trimmed = test.trim_start();
    let is_statement = trimmed
        .strip_prefix("assert")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_whitespace() || c == '(');
    if is_statement {
        trimmed.to_string()
    } else {
        format!("assert {}", test)
    }
}

/// Per-Statement Status
/// Distinguishes different failure modes for individual assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionStatus {
    Passed,
    /// The assertion evaluated to false
    Failed,
    /// Any other exception, including a syntax error in the assertion
    Error,
    /// Never reached: timeout, crash or program setup failure
    NotRun,
}

/// Overall state of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Program raised while being defined (syntax error, import error, ...)
    SetupError,
    TimedOut,
    /// Process died before reporting every statement
    Crashed,
    /// The interpreter could not be started at all
    EngineError,
}

/// Execution Output
/// Produced by the worker for one unique (task, candidate) job and
/// broadcast to every original copy of that candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub task_id: String,
    pub prompt: String,
    pub completion: String,
    pub status: RunStatus,
    pub passed: bool,
    pub assertions: Vec<AssertionStatus>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExecutionResult {
    /// Boolean outcome per statement, in submitted order
    pub fn outcomes(&self) -> Vec<bool> {
        self.assertions
            .iter()
            .map(|s| *s == AssertionStatus::Passed)
            .collect()
    }

    pub fn pass_count(&self) -> usize {
        self.assertions
            .iter()
            .filter(|s| **s == AssertionStatus::Passed)
            .count()
    }
}

/// Persisted selection, one per task
/// `candidate_text: None` is the explicit "no candidate passed" marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub task_id: String,
    pub prompt: String,
    #[serde(alias = "solution")]
    pub candidate_text: Option<String>,
    pub score: usize,
    pub total: usize,
}

/// Exercise produced from a generation prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub exercise_id: String,
    pub problem: String,
    pub solution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseSolutions {
    pub exercise_id: String,
    pub problem: String,
    pub solutions: Vec<String>,
}

/// Raw generated test text per exercise
/// `problem` is the test prompt (ends with `assert `), so each entry
/// continues an assertion rather than being a full statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseTests {
    pub exercise_id: String,
    pub problem: String,
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseWithTests {
    pub exercise_id: String,
    pub problem: String,
    pub solutions: Vec<String>,
    pub tests: Vec<String>,
}

/// Candidate checked against a hand-written `check(candidate)` suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCodeSample {
    pub task_id: String,
    pub prompt: String,
    pub completion: String,
    pub test: String,
    pub entry_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedSample {
    #[serde(flatten)]
    pub sample: TestCodeSample,
    pub status: RunStatus,
    pub passed: bool,
}
