mod engine;
mod evaluator;
mod executor;
mod metrics;
mod pipeline;
mod scheduler;
mod selector;
#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;
use verdict_common::config::parse_limit;
use verdict_common::store::{read_jsonl, read_jsonl_dir, write_jsonl};
use verdict_common::types::{Candidate, ExerciseWithTests, TestCodeSample, TestRecord, TestSuite};
use verdict_common::{Config, ExecutionMode, PassCriterion};

use crate::engine::{DummyEngine, ExecutionEngine, ProcessEngine};
use crate::scheduler::{Scheduler, SchedulerSettings};

#[derive(Parser)]
#[command(name = "verdict-worker")]
#[command(about = "Verdict worker - execute generated candidates against generated tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    run: RunArgs,
}

/// Flags overriding `VERDICT_*` environment configuration
#[derive(Args)]
struct RunArgs {
    /// Execution timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Max assertions per test batch (0 or "none" keeps all)
    #[arg(long, global = true)]
    limit: Option<String>,

    /// Max concurrent executions
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Execution mode: shared or isolated
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Pass criterion: completed or all-assertions
    #[arg(long, global = true)]
    pass_criterion: Option<String>,

    /// Use the dummy engine instead of spawning the interpreter
    #[arg(long, global = true)]
    debug: bool,

    /// Interpreter used by the process engine
    #[arg(long, global = true)]
    python: Option<String>,

    /// Write Prometheus metrics to this file when done
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify candidates against test records and select one solution per task
    Verify {
        /// Candidate JSONL file or directory
        #[arg(short, long)]
        candidates: PathBuf,

        /// Test record JSONL file or directory
        #[arg(short, long)]
        tests: PathBuf,

        /// Selection output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Select the best generated solution per exercise from joined exercise records
    Best {
        /// Exercise-with-tests JSONL file or directory
        #[arg(short, long)]
        exercises: PathBuf,

        /// Selection output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Check samples with their own test code
    Check {
        /// Test-code sample JSONL file or directory
        #[arg(short, long)]
        samples: PathBuf,

        /// Checked sample output file
        #[arg(short, long)]
        out: PathBuf,
    },
}

impl RunArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(limit) = &self.limit {
            config.limit = parse_limit(limit)?;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(mode) = &self.mode {
            config.mode = match ExecutionMode::parse(mode) {
                Some(mode) => mode,
                None => bail!("Invalid mode: {} (expected shared or isolated)", mode),
            };
        }
        if let Some(criterion) = &self.pass_criterion {
            config.pass_criterion = match PassCriterion::parse(criterion) {
                Some(criterion) => criterion,
                None => bail!(
                    "Invalid pass criterion: {} (expected completed or all-assertions)",
                    criterion
                ),
            };
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(python) = &self.python {
            config.python = python.clone();
        }
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("VERDICT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Records from a single JSONL file or every `.jsonl` file below a directory
fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if path.is_dir() {
        read_jsonl_dir(path)
    } else {
        read_jsonl(path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Ok(limit) = std::env::var("VERDICT_LIMIT") {
        parse_limit(&limit).context("VERDICT_LIMIT")?;
    }
    let mut config = Config::from_env();
    cli.run.apply(&mut config)?;

    metrics::init_metrics();

    let engine: Arc<dyn ExecutionEngine> = if config.debug {
        info!("Debug mode: using dummy engine");
        Arc::new(DummyEngine::new())
    } else {
        Arc::new(ProcessEngine::new(config.python.clone()))
    };
    let scheduler = Scheduler::new(engine, SchedulerSettings::from_config(&config));

    info!(
        timeout_ms = config.timeout_ms,
        limit = ?config.limit,
        pool_size = config.pool_size,
        mode = %config.mode,
        "Verdict worker starting"
    );

    match cli.command {
        Commands::Verify { candidates, tests, out } => {
            let candidates: Vec<Candidate> = read_records(&candidates)?;
            let records: Vec<TestRecord> = read_records(&tests)?;
            let suite = TestSuite::from_records(records);
            info!(
                candidates = candidates.len(),
                tasks_with_tests = suite.task_count(),
                "Inputs loaded"
            );

            let selections =
                pipeline::select_solutions(&scheduler, &candidates, &suite, config.limit).await?;
            write_jsonl(&out, &selections)?;
            info!("Wrote {} selections to {}", selections.len(), out.display());
        }
        Commands::Best { exercises, out } => {
            let exercises: Vec<ExerciseWithTests> = read_records(&exercises)?;
            let (candidates, suite) = pipeline::exercises_to_inputs(&exercises);
            info!(
                exercises = exercises.len(),
                candidates = candidates.len(),
                "Exercises loaded"
            );

            let selections =
                pipeline::select_solutions(&scheduler, &candidates, &suite, config.limit).await?;
            write_jsonl(&out, &selections)?;
            info!("Wrote {} selections to {}", selections.len(), out.display());
        }
        Commands::Check { samples, out } => {
            let samples: Vec<TestCodeSample> = read_records(&samples)?;
            let checked = scheduler.run_with_test_code(&samples).await?;
            let passed = checked.iter().filter(|c| c.passed).count();
            write_jsonl(&out, &checked)?;
            info!(
                "Wrote {} checked samples to {} ({} passed)",
                checked.len(),
                out.display(),
                passed
            );
        }
    }

    if let Some(path) = &cli.run.metrics_out {
        let text = metrics::render_metrics()?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!("Metrics written to {}", path.display());
    }

    Ok(())
}
