// CLI commands for the generation side of verdict
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use verdict_common::store::{read_jsonl, read_jsonl_dir, write_jsonl};
use verdict_common::types::{Exercise, ExerciseSolutions, ExerciseTests, ExerciseWithTests};
use verdict_common::Config;

use crate::generator::{Generator, StubGenerator, TgiGenerator};
use crate::orchestrator::{GenerationSummary, Orchestrator, OrchestratorSettings, WorkUnit};
use crate::retry::RetryPolicy;

/// Functions per generation in debug mode
const STUB_FUNCTIONS: usize = 3;

/// Pick the generator backend for this run
pub fn build_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    if config.debug {
        return Ok(Arc::new(StubGenerator::new(STUB_FUNCTIONS)));
    }
    match &config.tgi_url {
        Some(url) => Ok(Arc::new(TgiGenerator::new(url))),
        None => bail!("No generation endpoint configured: set VERDICT_TGI_URL or pass --debug"),
    }
}

fn settings(config: &Config, samples: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        pool_size: config.pool_size,
        retry: RetryPolicy::new(config.retries, config.retry_delay()),
        samples,
    }
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if path.is_dir() {
        read_jsonl_dir(path)
    } else {
        read_jsonl(path)
    }
}

/// Load prompts from a JSON array of strings
fn load_prompts(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as a list of prompts", path.display()))
}

/// Exercises usable for follow-up generation
///
/// Degraded prompt records carry an empty id and are left out.
fn load_exercises(path: &Path) -> Result<Vec<Exercise>> {
    let exercises: Vec<Exercise> = read_records(path)?;
    let total = exercises.len();
    let usable: Vec<Exercise> = exercises
        .into_iter()
        .filter(|e| !e.exercise_id.is_empty())
        .collect();
    if usable.len() < total {
        println!("⚠️  Ignoring {} degraded exercise records", total - usable.len());
    }
    Ok(usable)
}

fn print_summary(summary: &GenerationSummary, out: &Path) {
    println!();
    println!("✅ Generation finished for {} units: {}", summary.total(), summary);
    println!("   Output: {}", out.display());
    if summary.degraded > 0 || summary.failed > 0 {
        println!("   Degraded outputs are kept on disk; delete them to regenerate on the next run");
    }
}

/// Generate exercises from prompts
pub async fn generate_exercises(
    generator: Arc<dyn Generator>,
    config: &Config,
    prompts: &Path,
    out: &Path,
) -> Result<GenerationSummary> {
    let prompts = load_prompts(prompts)?;
    println!("🚀 Generating exercises for {} prompts", prompts.len());

    let units = prompts.into_iter().map(WorkUnit::Prompt).collect();
    let summary = Orchestrator::new(generator, settings(config, 0), out)
        .run(units)
        .await;

    print_summary(&summary, out);
    Ok(summary)
}

/// Generate candidate solutions for every exercise
pub async fn generate_solutions(
    generator: Arc<dyn Generator>,
    config: &Config,
    exercises: &Path,
    out: &Path,
    samples: usize,
) -> Result<GenerationSummary> {
    let exercises = load_exercises(exercises)?;
    println!(
        "🚀 Generating {} solutions for {} exercises",
        samples,
        exercises.len()
    );

    let units = exercises.into_iter().map(WorkUnit::Solutions).collect();
    let summary = Orchestrator::new(generator, settings(config, samples), out)
        .run(units)
        .await;

    print_summary(&summary, out);
    Ok(summary)
}

/// Generate raw test continuations for every exercise
pub async fn generate_tests(
    generator: Arc<dyn Generator>,
    config: &Config,
    exercises: &Path,
    out: &Path,
    samples: usize,
) -> Result<GenerationSummary> {
    let exercises = load_exercises(exercises)?;
    println!(
        "🚀 Generating {} tests for {} exercises",
        samples,
        exercises.len()
    );

    let units = exercises.into_iter().map(WorkUnit::Tests).collect();
    let summary = Orchestrator::new(generator, settings(config, samples), out)
        .run(units)
        .await;

    print_summary(&summary, out);
    Ok(summary)
}

/// Join solutions and tests per exercise
///
/// Exercises missing either side, or left with no solutions or no tests
/// after a degraded generation, are dropped.
pub fn join(solutions: &Path, tests: &Path, out: &Path) -> Result<Vec<ExerciseWithTests>> {
    let solutions: Vec<ExerciseSolutions> = read_records(solutions)?;
    let tests: Vec<ExerciseTests> = read_records(tests)?;

    let mut tests_by_id: HashMap<String, Vec<String>> = HashMap::new();
    for record in tests {
        tests_by_id
            .entry(record.exercise_id)
            .or_default()
            .extend(record.tests);
    }

    let mut joined = Vec::new();
    let mut dropped = 0;
    for record in solutions {
        match tests_by_id.remove(&record.exercise_id) {
            Some(tests) if !tests.is_empty() && !record.solutions.is_empty() => {
                joined.push(ExerciseWithTests {
                    exercise_id: record.exercise_id,
                    problem: record.problem,
                    solutions: record.solutions,
                    tests,
                });
            }
            _ => dropped += 1,
        }
    }

    write_jsonl(out, &joined)?;
    println!(
        "✅ Joined {} exercises into {} ({} dropped)",
        joined.len(),
        out.display(),
        dropped
    );
    Ok(joined)
}
