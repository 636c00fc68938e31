//! Dedup Fan-out Scheduler
//!
//! Submits one execution per unique `(task_id, completion)` pair to a
//! bounded pool, waits for the whole batch, then hands every original
//! job the result of its unique twin.
//!
//! ## Guarantees
//! - The dedup plan is built once before submission and never mutated
//! - At most `pool_size` executions are in flight
//! - Each unique job fills exactly one slot; only the collecting loop writes
//! - A job that panics is logged, siblings keep running
//! - Output is 1:1 with input; a missing slot fails the whole batch

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info};
use verdict_common::types::{
    Candidate, CheckedSample, ExecutionResult, PassCriterion, TestCodeSample, TestSuite,
    VerificationJob,
};
use verdict_common::Config;

use crate::engine::ExecutionEngine;
use crate::executor::{self, ExecutionOptions};
use crate::metrics;

/// Scheduler knobs
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub pool_size: usize,
    /// Timeout given to jobs the scheduler builds itself
    pub timeout: Duration,
    pub options: ExecutionOptions,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool_size: config.pool_size,
            timeout: config.timeout(),
            options: ExecutionOptions {
                mode: config.mode,
                pass_criterion: config.pass_criterion,
            },
        }
    }
}

/// Immutable mapping from original jobs to unique executions
#[derive(Debug)]
struct DedupPlan {
    /// Index of the first original job for each unique slot
    unique: Vec<usize>,
    /// Slot serving each original job
    slot_of: Vec<usize>,
}

impl DedupPlan {
    fn build(jobs: &[VerificationJob]) -> Self {
        let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
        let mut unique = Vec::new();
        let mut slot_of = Vec::with_capacity(jobs.len());

        for (idx, job) in jobs.iter().enumerate() {
            let slot = *slots.entry(job.dedup_key()).or_insert_with(|| {
                unique.push(idx);
                unique.len() - 1
            });
            slot_of.push(slot);
        }

        Self { unique, slot_of }
    }

    fn duplicates(&self) -> usize {
        self.slot_of.len() - self.unique.len()
    }
}

pub struct Scheduler<E: ?Sized> {
    engine: Arc<E>,
    settings: SchedulerSettings,
}

impl<E> Scheduler<E>
where
    E: ExecutionEngine + ?Sized + 'static,
{
    pub fn new(engine: Arc<E>, settings: SchedulerSettings) -> Self {
        Self { engine, settings }
    }

    /// Execute `jobs`, returning one result per job in input order
    pub async fn run(&self, jobs: &[VerificationJob]) -> Result<Vec<ExecutionResult>> {
        self.run_with_options(jobs, self.settings.options).await
    }

    async fn run_with_options(
        &self,
        jobs: &[VerificationJob],
        options: ExecutionOptions,
    ) -> Result<Vec<ExecutionResult>> {
        let plan = DedupPlan::build(jobs);
        let total = plan.unique.len();
        let pool_size = self.settings.pool_size.max(1);

        info!(
            submitted = total,
            duplicates = plan.duplicates(),
            pool_size,
            "execution requests are submitted"
        );
        metrics::record_duplicates(plan.duplicates());

        let mut slots: Vec<Option<ExecutionResult>> = vec![None; total];

        let mut completions = stream::iter(plan.unique.iter().enumerate())
            .map(|(slot, &job_idx)| {
                let engine = Arc::clone(&self.engine);
                let job = jobs[job_idx].clone();
                async move {
                    let handle = tokio::spawn(async move {
                        executor::execute(engine.as_ref(), &job, &options).await
                    });
                    (slot, handle.await)
                }
            })
            .buffer_unordered(pool_size);

        let mut done = 0;
        while let Some((slot, joined)) = completions.next().await {
            done += 1;
            match joined {
                Ok(result) => {
                    metrics::record_execution(options.mode, &result);
                    debug!(slot, task_id = %result.task_id, passed = result.passed, "slot filled");
                    slots[slot] = Some(result);
                }
                Err(e) => {
                    error!(slot, error = %e, "execution task failed");
                }
            }
            info!("[{}/{}] execution completed", done, total);
        }

        let mut results = Vec::with_capacity(jobs.len());
        let mut missing = 0;
        for &slot in &plan.slot_of {
            match &slots[slot] {
                Some(result) => results.push(result.clone()),
                None => missing += 1,
            }
        }

        ensure!(
            missing == 0,
            "{} of {} submitted candidates have no execution result",
            missing,
            jobs.len()
        );

        info!(results = results.len(), "execution finished");
        Ok(results)
    }

    /// Verify candidates against the effective test set of their task
    ///
    /// Candidates whose task has no tests are skipped and left out of the
    /// returned results.
    pub async fn run_with_test_cases(
        &self,
        candidates: &[Candidate],
        suite: &TestSuite,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionResult>> {
        let mut effective: HashMap<&str, Vec<String>> = HashMap::new();
        let mut jobs = Vec::with_capacity(candidates.len());
        let mut skipped = 0;

        for candidate in candidates {
            let tests = effective
                .entry(candidate.task_id.as_str())
                .or_insert_with(|| suite.effective_tests(&candidate.task_id, limit));
            if tests.is_empty() {
                skipped += 1;
                continue;
            }
            jobs.push(VerificationJob {
                task_id: candidate.task_id.clone(),
                prompt: candidate.prompt.clone(),
                completion: candidate.completion.clone(),
                tests: tests.clone(),
                entry_point: None,
                test_code: None,
                timeout_ms: self.settings.timeout.as_millis() as u64,
            });
        }

        if skipped > 0 {
            info!(skipped, "candidates without test cases skipped");
            metrics::record_without_tests(skipped);
        }

        self.run(&jobs).await
    }

    /// Check samples with their own `check(entry_point)` test code
    ///
    /// A sample passes only if every check held, whatever the configured
    /// criterion.
    pub async fn run_with_test_code(&self, samples: &[TestCodeSample]) -> Result<Vec<CheckedSample>> {
        let jobs: Vec<VerificationJob> = samples
            .iter()
            .map(|sample| VerificationJob {
                task_id: sample.task_id.clone(),
                prompt: sample.prompt.clone(),
                completion: sample.completion.clone(),
                tests: Vec::new(),
                entry_point: Some(sample.entry_point.clone()),
                test_code: Some(sample.test.clone()),
                timeout_ms: self.settings.timeout.as_millis() as u64,
            })
            .collect();

        let options = ExecutionOptions {
            pass_criterion: PassCriterion::AllAssertions,
            ..self.settings.options
        };
        let results = self.run_with_options(&jobs, options).await?;

        Ok(samples
            .iter()
            .zip(results)
            .map(|(sample, result)| CheckedSample {
                sample: sample.clone(),
                status: result.status,
                passed: result.passed,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DummyEngine, EngineFuture, ProcessEngine};
    use crate::evaluator::RawRun;
    use crate::executor::HarnessProgram;
    use crate::testing::{candidate, job, python_available, PROMPT};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use verdict_common::types::{RunStatus, TestRecord};

    /// Counts runs and in-flight peaks, panics on programs containing `PANIC`
    #[derive(Default)]
    struct CountingEngine {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ExecutionEngine for CountingEngine {
        fn execute<'a>(&'a self, program: &'a HarnessProgram, timeout: Duration) -> EngineFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if program.source.contains("PANIC") {
                    panic!("engine blew up");
                }
                let raw: RawRun = DummyEngine::new().execute(program, timeout).await;
                raw
            })
        }
    }

    fn settings(pool_size: usize) -> SchedulerSettings {
        SchedulerSettings {
            pool_size,
            timeout: Duration::from_secs(5),
            options: ExecutionOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_identical_candidates_execute_once() {
        let engine = Arc::new(CountingEngine::default());
        let scheduler = Scheduler::new(Arc::clone(&engine), settings(4));
        let jobs = vec![
            job("t1", "return 1", &["f() == 1"], 1000),
            job("t1", "return 2", &["f() == 1"], 1000),
            job("t1", "return 1", &["f() == 1"], 1000),
            job("t2", "return 1", &["f() == 1"], 1000),
        ];

        let results = scheduler.run(&jobs).await.unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), jobs.len());
        assert_eq!(results[0].job_id, results[2].job_id);
        assert_ne!(results[0].job_id, results[1].job_id);
        assert_ne!(results[0].job_id, results[3].job_id);
        for (job, result) in jobs.iter().zip(&results) {
            assert_eq!(job.task_id, result.task_id);
            assert_eq!(job.completion, result.completion);
        }
    }

    #[tokio::test]
    async fn test_pool_size_bounds_concurrency() {
        let engine = Arc::new(CountingEngine::default());
        let scheduler = Scheduler::new(Arc::clone(&engine), settings(2));
        let jobs: Vec<VerificationJob> = (0..8)
            .map(|i| job("t1", &format!("return {}", i), &["f() == 1"], 1000))
            .collect();

        let results = scheduler.run(&jobs).await.unwrap();

        assert_eq!(results.len(), 8);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 8);
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_job_isolated_then_reported() {
        let engine = Arc::new(CountingEngine::default());
        let scheduler = Scheduler::new(Arc::clone(&engine), settings(2));
        let jobs = vec![
            job("t1", "return 1", &["f() == 1"], 1000),
            job("t1", "return 'PANIC'", &["f() == 1"], 1000),
            job("t1", "return 3", &["f() == 1"], 1000),
        ];

        let err = scheduler.run(&jobs).await.unwrap_err();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("1 of 3 submitted candidates"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = Scheduler::new(Arc::new(DummyEngine::new()), settings(2));
        let results = scheduler.run(&[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_run_with_test_cases_skips_tasks_without_tests() {
        let engine = Arc::new(CountingEngine::default());
        let scheduler = Scheduler::new(Arc::clone(&engine), settings(2));
        let candidates = vec![
            candidate("t1", "return 1"),
            candidate("orphan", "return 1"),
            candidate("t1", "return 1"),
        ];
        let suite = TestSuite::from_records(vec![TestRecord::Batch {
            task_id: "t1".into(),
            tests: vec!["f() == 1".into(), "f() == 2".into(), "f() == 3".into()],
        }]);

        let results = scheduler
            .run_with_test_cases(&candidates, &suite, Some(2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.task_id == "t1"));
        assert!(results.iter().all(|r| r.assertions.len() == 2));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_with_test_code_uses_all_assertions() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let scheduler = Scheduler::new(Arc::new(ProcessEngine::new("python3")), settings(2));
        let sample = |completion: &str| TestCodeSample {
            task_id: "HumanEval/1".into(),
            prompt: "def double(x):\n    ".into(),
            completion: completion.into(),
            test: "def check(candidate):\n    assert candidate(2) == 4\n    assert candidate(0) == 0\n"
                .into(),
            entry_point: "double".into(),
        };
        let samples = vec![sample("return x * 2"), sample("return x + 2"), sample("return x * 2")];

        let checked = scheduler.run_with_test_code(&samples).await.unwrap();

        assert_eq!(checked.len(), 3);
        assert!(checked[0].passed);
        assert!(!checked[1].passed);
        assert_eq!(checked[1].status, RunStatus::Completed);
        assert!(checked[2].passed);
    }

    #[tokio::test]
    async fn test_infinite_loop_does_not_stall_batch() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let scheduler = Scheduler::new(Arc::new(ProcessEngine::new("python3")), settings(2));
        let jobs = vec![
            job("t1", "while True:\n        pass", &["f() == 1"], 1000),
            job("t1", "return 1", &["f() == 1"], 1000),
        ];

        let start = std::time::Instant::now();
        let results = scheduler.run(&jobs).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(results[0].status, RunStatus::TimedOut);
        assert!(!results[0].passed);
        assert!(results[1].passed);
        assert_eq!(results[1].prompt, PROMPT);
    }
}
