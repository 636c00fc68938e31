//! Result Aggregator - Outcome Vectors from Raw Runs
//!
//! **Core Responsibility:**
//! Turn raw interpreter runs into a per-statement outcome vector and a
//! single `passed` verdict.
//!
//! **Critical Properties:**
//! - Knows nothing about processes or timeout enforcement
//! - Knows nothing about scheduling or dedup
//! - Pure function: (raw runs, pass criterion) → execution result
//!
//! **Report Protocol (written by the harness, one line each):**
//! - `<marker> setup ok` / `<marker> setup error <ExceptionName>`
//! - `<marker> statement <index> passed|failed|error`
//!
//! Statements without a line are `NotRun`.

use std::time::Duration;

use tracing::debug;
use uuid::Uuid;
use verdict_common::types::{
    AssertionStatus, ExecutionResult, PassCriterion, RunStatus, VerificationJob,
};

/// Raw output of one interpreter run
/// Produced by an ExecutionEngine, consumed by the Aggregator
#[derive(Debug, Clone, Default)]
pub struct RawRun {
    /// Stdout lines carrying the run marker, in arrival order
    pub report_lines: Vec<String>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub execution_time_ms: u64,
    /// Set when the interpreter could not be started or awaited
    pub engine_error: Option<String>,
}

impl RawRun {
    pub fn engine_error(message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            engine_error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Parsed view of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub statements: Vec<AssertionStatus>,
    pub detail: Option<String>,
}

pub fn setup_line(marker: &str, error: Option<&str>) -> String {
    match error {
        None => format!("{} setup ok", marker),
        Some(name) => format!("{} setup error {}", marker, name),
    }
}

pub fn statement_line(marker: &str, index: usize, status: AssertionStatus) -> String {
    let outcome = match status {
        AssertionStatus::Passed => "passed",
        AssertionStatus::Failed => "failed",
        AssertionStatus::Error | AssertionStatus::NotRun => "error",
    };
    format!("{} statement {} {}", marker, index, outcome)
}

/// Parse the report lines of one run with `count` statements
///
/// Status priority: engine error, timeout, setup error, crash.
/// A run is `Completed` only if setup succeeded, every statement
/// reported and the process exited cleanly.
pub fn parse_report(raw: &RawRun, marker: &str, count: usize) -> RunReport {
    let mut statements = vec![AssertionStatus::NotRun; count];
    let mut setup: Option<Result<(), String>> = None;

    for line in &raw.report_lines {
        let Some(body) = line.strip_prefix(marker) else {
            continue;
        };
        let mut parts = body.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("setup"), Some("ok"), _) => setup = Some(Ok(())),
            (Some("setup"), Some("error"), name) => {
                setup = Some(Err(name.unwrap_or("Exception").to_string()))
            }
            (Some("statement"), Some(index), Some(outcome)) => {
                let Ok(index) = index.parse::<usize>() else {
                    continue;
                };
                if let Some(slot) = statements.get_mut(index) {
                    *slot = match outcome {
                        "passed" => AssertionStatus::Passed,
                        "failed" => AssertionStatus::Failed,
                        _ => AssertionStatus::Error,
                    };
                }
            }
            _ => {}
        }
    }

    let all_reported = statements.iter().all(|s| *s != AssertionStatus::NotRun);

    let (status, detail) = if let Some(err) = &raw.engine_error {
        (RunStatus::EngineError, Some(err.clone()))
    } else if raw.timed_out {
        (RunStatus::TimedOut, Some("execution timed out".to_string()))
    } else if let Some(Err(name)) = &setup {
        (RunStatus::SetupError, Some(name.clone()))
    } else if setup.is_none() || !all_reported || raw.exit_code != Some(0) {
        (RunStatus::Crashed, Some(crash_detail(raw)))
    } else {
        (RunStatus::Completed, None)
    };

    RunReport {
        status,
        statements,
        detail,
    }
}

fn crash_detail(raw: &RawRun) -> String {
    let exit = match raw.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    };
    match raw.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => format!("{}: {}", exit, last.trim()),
        None => exit,
    }
}

/// Fold the runs of one job into its execution result
///
/// Runs are concatenated in order, so shared mode (one run) and
/// isolated mode (one run per statement) produce the same vector shape.
/// The first non-completed run decides the overall status.
pub fn aggregate(
    job_id: Uuid,
    job: &VerificationJob,
    reports: Vec<RunReport>,
    criterion: PassCriterion,
    elapsed: Duration,
) -> ExecutionResult {
    let status = reports
        .iter()
        .map(|r| r.status)
        .find(|s| *s != RunStatus::Completed)
        .unwrap_or(RunStatus::Completed);
    let detail = reports.iter().find_map(|r| r.detail.clone());
    let assertions: Vec<AssertionStatus> =
        reports.into_iter().flat_map(|r| r.statements).collect();

    let completed = status == RunStatus::Completed;
    let passed = match criterion {
        PassCriterion::Completed => completed,
        PassCriterion::AllAssertions => {
            completed && assertions.iter().all(|s| *s == AssertionStatus::Passed)
        }
    };

    let result = ExecutionResult {
        job_id,
        task_id: job.task_id.clone(),
        prompt: job.prompt.clone(),
        completion: job.completion.clone(),
        status,
        passed,
        assertions,
        execution_time_ms: elapsed.as_millis() as u64,
        detail,
    };

    debug!(
        job_id = %job_id,
        task_id = %result.task_id,
        status = ?result.status,
        passed = result.passed,
        score = result.pass_count(),
        total = result.assertions.len(),
        "evaluation complete"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "@@verdict-test";

    fn job() -> VerificationJob {
        VerificationJob {
            task_id: "t1".into(),
            prompt: "def f():\n    ".into(),
            completion: "return 1".into(),
            tests: vec!["f() == 1".into(), "f() == 2".into()],
            entry_point: None,
            test_code: None,
            timeout_ms: 1000,
        }
    }

    fn clean_run(lines: Vec<String>) -> RawRun {
        RawRun {
            report_lines: lines,
            exit_code: Some(0),
            execution_time_ms: 12,
            ..RawRun::default()
        }
    }

    #[test]
    fn test_all_statements_reported() {
        let raw = clean_run(vec![
            setup_line(MARKER, None),
            statement_line(MARKER, 0, AssertionStatus::Passed),
            statement_line(MARKER, 1, AssertionStatus::Failed),
        ]);

        let report = parse_report(&raw, MARKER, 2);

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(
            report.statements,
            vec![AssertionStatus::Passed, AssertionStatus::Failed]
        );
        assert_eq!(report.detail, None);
    }

    #[test]
    fn test_setup_error() {
        let raw = RawRun {
            report_lines: vec![setup_line(MARKER, Some("SyntaxError"))],
            exit_code: Some(3),
            ..RawRun::default()
        };

        let report = parse_report(&raw, MARKER, 2);

        assert_eq!(report.status, RunStatus::SetupError);
        assert_eq!(report.detail.as_deref(), Some("SyntaxError"));
        assert!(report.statements.iter().all(|s| *s == AssertionStatus::NotRun));
    }

    #[test]
    fn test_timeout_keeps_partial_outcomes() {
        let raw = RawRun {
            report_lines: vec![
                setup_line(MARKER, None),
                statement_line(MARKER, 0, AssertionStatus::Passed),
            ],
            timed_out: true,
            ..RawRun::default()
        };

        let report = parse_report(&raw, MARKER, 3);

        assert_eq!(report.status, RunStatus::TimedOut);
        assert_eq!(
            report.statements,
            vec![
                AssertionStatus::Passed,
                AssertionStatus::NotRun,
                AssertionStatus::NotRun
            ]
        );
    }

    #[test]
    fn test_missing_lines_mean_crash() {
        let raw = RawRun {
            report_lines: vec![setup_line(MARKER, None)],
            stderr: "Fatal Python error: Segmentation fault\n".into(),
            exit_code: None,
            ..RawRun::default()
        };

        let report = parse_report(&raw, MARKER, 1);

        assert_eq!(report.status, RunStatus::Crashed);
        assert_eq!(
            report.detail.as_deref(),
            Some("killed by signal: Fatal Python error: Segmentation fault")
        );
    }

    #[test]
    fn test_foreign_and_malformed_lines_ignored() {
        let raw = clean_run(vec![
            "@@verdict-other statement 0 passed".into(),
            format!("{} statement zero passed", MARKER),
            format!("{} statement 9 passed", MARKER),
            setup_line(MARKER, None),
            statement_line(MARKER, 0, AssertionStatus::Error),
        ]);

        let report = parse_report(&raw, MARKER, 1);

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.statements, vec![AssertionStatus::Error]);
    }

    #[test]
    fn test_engine_error_wins() {
        let raw = RawRun::engine_error("failed to start python3", 0);
        let report = parse_report(&raw, MARKER, 1);
        assert_eq!(report.status, RunStatus::EngineError);
    }

    #[test]
    fn test_aggregate_completed_criterion_ignores_assertion_truth() {
        let raw = clean_run(vec![
            setup_line(MARKER, None),
            statement_line(MARKER, 0, AssertionStatus::Passed),
            statement_line(MARKER, 1, AssertionStatus::Failed),
        ]);
        let report = parse_report(&raw, MARKER, 2);

        let result = aggregate(
            Uuid::new_v4(),
            &job(),
            vec![report],
            PassCriterion::Completed,
            Duration::from_millis(12),
        );

        assert!(result.passed);
        assert_eq!(result.outcomes(), vec![true, false]);
        assert_eq!(result.execution_time_ms, 12);
    }

    #[test]
    fn test_aggregate_all_assertions_criterion() {
        let raw = clean_run(vec![
            setup_line(MARKER, None),
            statement_line(MARKER, 0, AssertionStatus::Passed),
            statement_line(MARKER, 1, AssertionStatus::Failed),
        ]);
        let report = parse_report(&raw, MARKER, 2);

        let result = aggregate(
            Uuid::new_v4(),
            &job(),
            vec![report],
            PassCriterion::AllAssertions,
            Duration::ZERO,
        );

        assert!(!result.passed);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[test]
    fn test_aggregate_isolated_runs_concatenate() {
        let first = parse_report(
            &clean_run(vec![
                setup_line(MARKER, None),
                statement_line(MARKER, 0, AssertionStatus::Passed),
            ]),
            MARKER,
            1,
        );
        let second = parse_report(
            &RawRun {
                report_lines: vec![setup_line(MARKER, None)],
                timed_out: true,
                ..RawRun::default()
            },
            MARKER,
            1,
        );

        let result = aggregate(
            Uuid::new_v4(),
            &job(),
            vec![first, second],
            PassCriterion::Completed,
            Duration::ZERO,
        );

        assert_eq!(result.status, RunStatus::TimedOut);
        assert!(!result.passed);
        assert_eq!(
            result.assertions,
            vec![AssertionStatus::Passed, AssertionStatus::NotRun]
        );
        assert_eq!(result.detail.as_deref(), Some("execution timed out"));
    }
}
