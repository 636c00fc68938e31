//! Execution Engine - Abstraction for Running Harness Programs
//!
//! **Core Responsibility:**
//! Run one harness program under a wall-clock budget and capture its
//! raw report lines.
//!
//! **Critical Architectural Boundary:**
//! - Engine knows HOW to run (local interpreter process, stub, ...)
//! - Engine does NOT know what the statements are
//! - Engine does NOT decide pass/fail
//! - Engine returns raw output for the Aggregator to judge
//!
//! Any implementation must guarantee:
//! 1. The program cannot crash or stall the caller
//! 2. The budget is enforced by killing the run on expiry
//! 3. No state survives from one run to the next
//! 4. Failures come back as data in `RawRun`, never as a panic

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::evaluator::{self, RawRun};
use crate::executor::HarnessProgram;
use verdict_common::types::AssertionStatus;

/// Boxed future returned by engines, keeps the trait usable as `dyn`
pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = RawRun> + Send + 'a>>;

/// Stderr kept per run; the rest is drained and dropped
const STDERR_LIMIT: u64 = 16 * 1024;

/// Longest stdout line still inspected; report lines are far shorter
const REPORT_LINE_LIMIT: u64 = 4 * 1024;

pub trait ExecutionEngine: Send + Sync {
    /// Run a harness program
    ///
    /// ## Arguments
    /// * `program` - Harness source plus its report marker
    /// * `timeout` - Wall-clock budget for the whole run
    fn execute<'a>(&'a self, program: &'a HarnessProgram, timeout: Duration) -> EngineFuture<'a>;
}

/// Interpreter subprocess engine
///
/// Each run is a fresh interpreter reading the harness from stdin (closed
/// once written), with stdout lines capped in length, a cleared environment (PATH kept) and `kill_on_drop` so a dropped or
/// expired run never leaves the child behind. Not a sandbox: OS-level
/// confinement is up to the host.
pub struct ProcessEngine {
    interpreter: String,
}

impl ProcessEngine {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    async fn run(&self, program: &HarnessProgram, timeout: Duration) -> RawRun {
        let start = Instant::now();
        let path_env = std::env::var("PATH")
            .unwrap_or_else(|_| "/usr/bin:/usr/local/bin:/bin".to_string());

        let spawned = Command::new(&self.interpreter)
            .arg("-")
            .env_clear()
            .env("PATH", &path_env)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(interpreter = %self.interpreter, error = %e, "failed to start interpreter");
                return RawRun::engine_error(
                    format!("failed to start {}: {}", self.interpreter, e),
                    start.elapsed().as_millis() as u64,
                );
            }
        };

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return RawRun::engine_error("child pipes unavailable", 0);
        };

        let marker = program.marker.as_str();
        let mut report_lines = Vec::new();
        let mut stderr_buf = Vec::new();

        let run = async {
            if let Err(e) = stdin.write_all(program.source.as_bytes()).await {
                debug!(error = %e, "interpreter closed stdin early");
            }
            drop(stdin);

            let read_stdout = collect_report_lines(stdout, marker, &mut report_lines);
            let read_stderr = async {
                let _ = (&mut stderr)
                    .take(STDERR_LIMIT)
                    .read_to_end(&mut stderr_buf)
                    .await;
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
            };

            let (_, _, status) = tokio::join!(read_stdout, read_stderr, child.wait());
            status
        };

        let outcome = tokio::time::timeout(timeout, run).await;

        let (exit_code, timed_out, engine_error) = match outcome {
            Ok(Ok(status)) => (status.code(), false, None),
            Ok(Err(e)) => (None, false, Some(format!("failed to await interpreter: {}", e))),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "child already gone at timeout");
                }
                let _ = child.wait().await;
                (None, true, None)
            }
        };

        RawRun {
            report_lines,
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code,
            timed_out,
            execution_time_ms: start.elapsed().as_millis() as u64,
            engine_error,
        }
    }
}

/// Keep stdout lines that start with `marker`
///
/// Reads at most `REPORT_LINE_LIMIT` bytes at a time. A longer line is
/// dropped in pieces up to its newline, so memory stays bounded however
/// much the program writes.
async fn collect_report_lines<R>(stdout: R, marker: &str, lines: &mut Vec<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    let mut overlong = false;
    loop {
        line.clear();
        match (&mut reader)
            .take(REPORT_LINE_LIMIT)
            .read_until(b'\n', &mut line)
            .await
        {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let complete = line.ends_with(b"\n");
                let skip = overlong;
                overlong = !complete;
                if skip || !complete {
                    continue;
                }
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if text.starts_with(marker) {
                    lines.push(text.to_string());
                }
            }
        }
    }
}

impl ExecutionEngine for ProcessEngine {
    fn execute<'a>(&'a self, program: &'a HarnessProgram, timeout: Duration) -> EngineFuture<'a> {
        Box::pin(self.run(program, timeout))
    }
}

/// Dummy execution engine for debug runs and tests
///
/// **Dummy Execution Rules:**
/// 1. Never spawns a process
/// 2. Program setup always succeeds
/// 3. Every statement passes
/// 4. Fixed execution time: 5ms
pub struct DummyEngine;

impl DummyEngine {
    pub fn new() -> Self {
        DummyEngine
    }
}

impl Default for DummyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine for DummyEngine {
    fn execute<'a>(&'a self, program: &'a HarnessProgram, _timeout: Duration) -> EngineFuture<'a> {
        Box::pin(async move {
            let mut report_lines = vec![evaluator::setup_line(&program.marker, None)];
            report_lines.extend((0..program.statements).map(|index| {
                evaluator::statement_line(&program.marker, index, AssertionStatus::Passed)
            }));

            RawRun {
                report_lines,
                exit_code: Some(0),
                execution_time_ms: 5,
                ..RawRun::default()
            }
        })
    }
}
