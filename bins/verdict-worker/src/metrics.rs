// Prometheus metrics for verification runs

use std::sync::Once;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use verdict_common::types::{ExecutionMode, ExecutionResult, RunStatus};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Unique executions finished, by run status
    pub static ref EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("verdict_executions_total", "Total number of candidate executions"),
        &["status"]
    )
    .expect("metric can be created");

    // Execution time histogram (in milliseconds)
    pub static ref EXECUTION_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "verdict_execution_time_ms",
            "Candidate execution time in milliseconds"
        )
        .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]),
        &["mode"]
    )
    .expect("metric can be created");

    // Candidates served from another copy's execution
    pub static ref DUPLICATES_SKIPPED: IntCounter = IntCounter::new(
        "verdict_duplicate_candidates_total",
        "Candidates deduplicated before submission"
    )
    .expect("metric can be created");

    // Candidates dropped because their task has no tests
    pub static ref CANDIDATES_WITHOUT_TESTS: IntCounter = IntCounter::new(
        "verdict_candidates_without_tests_total",
        "Candidates skipped because their task has no test cases"
    )
    .expect("metric can be created");

    // Per-task selection outcome
    pub static ref SELECTIONS: CounterVec = CounterVec::new(
        Opts::new("verdict_selections_total", "Tasks processed by the consensus selector"),
        &["outcome"]
    )
    .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry (idempotent)
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(EXECUTIONS_TOTAL.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(EXECUTION_TIME.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(DUPLICATES_SKIPPED.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(CANDIDATES_WITHOUT_TESTS.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(SELECTIONS.clone()))
            .expect("collector can be registered");
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "completed",
        RunStatus::SetupError => "setup_error",
        RunStatus::TimedOut => "timed_out",
        RunStatus::Crashed => "crashed",
        RunStatus::EngineError => "engine_error",
    }
}

/// Record one finished unique execution
pub fn record_execution(mode: ExecutionMode, result: &ExecutionResult) {
    EXECUTIONS_TOTAL
        .with_label_values(&[status_label(result.status)])
        .inc();
    EXECUTION_TIME
        .with_label_values(&[&mode.to_string()])
        .observe(result.execution_time_ms as f64);
}

pub fn record_duplicates(count: usize) {
    DUPLICATES_SKIPPED.inc_by(count as u64);
}

pub fn record_without_tests(count: usize) {
    CANDIDATES_WITHOUT_TESTS.inc_by(count as u64);
}

/// Record the selector's outcome for one task
pub fn record_selection(selected: bool) {
    let outcome = if selected { "selected" } else { "none" };
    SELECTIONS.with_label_values(&[outcome]).inc();
}
