//! Isolated Executor
//!
//! Splices prompt and completion into a harness program, hands it to an
//! [`ExecutionEngine`] and folds the raw runs into an [`ExecutionResult`].
//!
//! ## Execution Modes
//! - `Shared`: one run executes the program then every statement in order;
//!   the job timeout covers the whole list
//! - `Isolated`: one fresh run per statement, each with the full timeout
//!
//! `execute` never fails: spawn errors, syntax errors, exceptions,
//! crashes and timeouts all come back as a `passed = false` result.

use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;
use verdict_common::types::{ExecutionMode, ExecutionResult, PassCriterion, VerificationJob};

use crate::engine::ExecutionEngine;
use crate::evaluator::{self, RunReport};

const HARNESS_TEMPLATE: &str = r#"import contextlib
import sys

_MARKER = __VERDICT_MARKER__
_PROGRAM = __VERDICT_PROGRAM__
_STATEMENTS = __VERDICT_STATEMENTS__
_OUT = sys.stdout


class _Sink:
    def write(self, text):
        return len(text)

    def flush(self):
        pass


def _report(line):
    _OUT.write("\n" + _MARKER + " " + line + "\n")
    _OUT.flush()


_namespace = {"__name__": "__candidate__"}
try:
    with contextlib.redirect_stdout(_Sink()):
        exec(compile(_PROGRAM, "<candidate>", "exec"), _namespace)
except BaseException as exc:
    _report("setup error " + type(exc).__name__)
    sys.exit(3)
_report("setup ok")

for _index, _statement in enumerate(_STATEMENTS):
    try:
        with contextlib.redirect_stdout(_Sink()):
            exec(compile(_statement, "<statement>", "exec"), _namespace)
    except AssertionError:
        _report("statement %d failed" % _index)
    except BaseException:
        _report("statement %d error" % _index)
    else:
        _report("statement %d passed" % _index)
"#;

/// Harness source ready for an engine
#[derive(Debug, Clone)]
pub struct HarnessProgram {
    pub source: String,
    /// Per-job tag prefixed to every report line
    pub marker: String,
    /// Number of statements the harness will report on
    pub statements: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub mode: ExecutionMode,
    pub pass_criterion: PassCriterion,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Shared,
            pass_criterion: PassCriterion::Completed,
        }
    }
}

/// ASCII-only Python string literal for arbitrary text
fn python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' '..='~' => out.push(c),
            c if (c as u32) <= 0xFFFF => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    out.push('"');
    out
}

fn python_list(items: &[String]) -> String {
    let literals: Vec<String> = items.iter().map(|s| python_literal(s)).collect();
    format!("[{}]", literals.join(", "))
}

/// Build the harness for `program` followed by `statements`
pub fn build_harness(program: &str, statements: &[String], marker: &str) -> HarnessProgram {
    let source = HARNESS_TEMPLATE
        .replace("__VERDICT_MARKER__", &python_literal(marker))
        .replace("__VERDICT_PROGRAM__", &python_literal(program))
        .replace("__VERDICT_STATEMENTS__", &python_list(statements));

    HarnessProgram {
        source,
        marker: marker.to_string(),
        statements: statements.len(),
    }
}

/// Execute one verification job
///
/// ## Arguments
/// * `engine` - Backend running the harness
/// * `job` - Candidate and its statements
/// * `options` - Execution mode and pass criterion
///
/// ## Returns
/// One result whose outcome vector matches `job.statements()` in order
pub async fn execute<E>(engine: &E, job: &VerificationJob, options: &ExecutionOptions) -> ExecutionResult
where
    E: ExecutionEngine + ?Sized,
{
    let job_id = Uuid::new_v4();
    let marker = format!("@@verdict-{}", job_id.simple());
    let program = job.program();
    let statements = job.statements();
    let timeout = Duration::from_millis(job.timeout_ms);
    let start = Instant::now();

    debug!(
        job_id = %job_id,
        task_id = %job.task_id,
        statements = statements.len(),
        mode = %options.mode,
        "executing candidate"
    );

    let reports: Vec<RunReport> = match options.mode {
        // With nothing to isolate, a single run still checks the program loads
        ExecutionMode::Isolated if !statements.is_empty() => {
            let mut reports = Vec::with_capacity(statements.len());
            for statement in &statements {
                let harness = build_harness(&program, std::slice::from_ref(statement), &marker);
                let raw = engine.execute(&harness, timeout).await;
                debug!(job_id = %job_id, elapsed_ms = raw.execution_time_ms, "statement run finished");
                reports.push(evaluator::parse_report(&raw, &marker, 1));
            }
            reports
        }
        _ => {
            let harness = build_harness(&program, &statements, &marker);
            let raw = engine.execute(&harness, timeout).await;
            debug!(job_id = %job_id, elapsed_ms = raw.execution_time_ms, "run finished");
            vec![evaluator::parse_report(&raw, &marker, statements.len())]
        }
    };

    evaluator::aggregate(job_id, job, reports, options.pass_criterion, start.elapsed())
}
