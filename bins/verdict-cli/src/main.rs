mod commands;
mod exercises;
mod generator;
mod orchestrator;
mod retry;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use verdict_common::Config;

#[derive(Parser)]
#[command(name = "verdict-cli")]
#[command(about = "Verdict CLI - generate exercises, solutions and tests for verification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    generation: GenerationArgs,
}

/// Flags overriding `VERDICT_*` environment configuration
#[derive(Args)]
struct GenerationArgs {
    /// Max concurrent generation units
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Attempts per unit before it degrades
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long, global = true)]
    retry_delay_ms: Option<u64>,

    /// Text-generation endpoint base URL
    #[arg(long, global = true)]
    tgi_url: Option<String>,

    /// Use the deterministic stub generator
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate exercises from a JSON list of prompts
    Exercises {
        /// Prompts file (JSON array of strings)
        #[arg(short, long)]
        prompts: PathBuf,

        /// Output directory, one sharded file per prompt
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Generate candidate solutions for each exercise
    Solutions {
        /// Exercise JSONL file or directory
        #[arg(short, long)]
        exercises: PathBuf,

        /// Output directory, one file per exercise
        #[arg(short, long)]
        out: PathBuf,

        /// Solutions per exercise
        #[arg(short, long, default_value = "5")]
        n: usize,
    },

    /// Generate test continuations for each exercise
    Tests {
        /// Exercise JSONL file or directory
        #[arg(short, long)]
        exercises: PathBuf,

        /// Output directory, one file per exercise
        #[arg(short, long)]
        out: PathBuf,

        /// Test samples per exercise
        #[arg(short, long, default_value = "5")]
        n: usize,
    },

    /// Join solutions and tests into exercise-with-tests records
    Join {
        /// Solutions JSONL file or directory
        #[arg(short, long)]
        solutions: PathBuf,

        /// Tests JSONL file or directory
        #[arg(short, long)]
        tests: PathBuf,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
}

impl GenerationArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        if let Some(url) = &self.tgi_url {
            config.tgi_url = Some(url.clone());
        }
        if self.debug {
            config.debug = true;
        }
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

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.generation.apply(&mut config);

    match cli.command {
        Commands::Exercises { prompts, out } => {
            let generator = commands::build_generator(&config)?;
            commands::generate_exercises(generator, &config, &prompts, &out).await?;
        }
        Commands::Solutions { exercises, out, n } => {
            let generator = commands::build_generator(&config)?;
            commands::generate_solutions(generator, &config, &exercises, &out, n).await?;
        }
        Commands::Tests { exercises, out, n } => {
            let generator = commands::build_generator(&config)?;
            commands::generate_tests(generator, &config, &exercises, &out, n).await?;
        }
        Commands::Join { solutions, tests, out } => {
            commands::join(&solutions, &tests, &out)?;
        }
    }

    Ok(())
}
