// Verification pipeline: candidates + tests -> one selection per task

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::{info, warn};
use verdict_common::assertions::{extract_assertions, function_name, truncate_completion};
use verdict_common::types::{
    Candidate, ExecutionResult, ExerciseWithTests, SelectionRecord, TestSuite,
};

use crate::engine::ExecutionEngine;
use crate::metrics;
use crate::scheduler::Scheduler;
use crate::selector::select_per_task;

/// Verify every candidate and pick the consensus best per task
///
/// Every task that appears among the candidates gets exactly one record,
/// in first-seen order. `candidate_text` is `None` when the task has no
/// tests or none of its candidates passed.
pub async fn select_solutions<E>(
    scheduler: &Scheduler<E>,
    candidates: &[Candidate],
    suite: &TestSuite,
    limit: Option<usize>,
) -> Result<Vec<SelectionRecord>>
where
    E: ExecutionEngine + ?Sized + 'static,
{
    let results = scheduler.run_with_test_cases(candidates, suite, limit).await?;

    let best_by_task: HashMap<&str, Option<&ExecutionResult>> =
        select_per_task(&results).into_iter().collect();

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for candidate in candidates {
        if !seen.insert(candidate.task_id.as_str()) {
            continue;
        }

        let total = suite.effective_tests(&candidate.task_id, limit).len();
        let best = best_by_task.get(candidate.task_id.as_str()).copied().flatten();
        metrics::record_selection(best.is_some());

        let record = match best {
            Some(best) => SelectionRecord {
                task_id: candidate.task_id.clone(),
                prompt: best.prompt.clone(),
                candidate_text: Some(best.completion.clone()),
                score: best.pass_count(),
                total,
            },
            None => {
                if total == 0 {
                    warn!(task_id = %candidate.task_id, "task has no test cases");
                }
                SelectionRecord {
                    task_id: candidate.task_id.clone(),
                    prompt: candidate.prompt.clone(),
                    candidate_text: None,
                    score: 0,
                    total,
                }
            }
        };
        records.push(record);
    }

    let selected = records.iter().filter(|r| r.candidate_text.is_some()).count();
    info!(tasks = records.len(), selected, "selection finished");
    Ok(records)
}

/// Candidates and test suite from joined exercise records
///
/// Each generated solution becomes a candidate, truncated to the function
/// body. Each raw test continuation is one batch of assertions about the
/// exercise's entry point. Exercises whose problem defines no function
/// contribute candidates but no tests.
pub fn exercises_to_inputs(exercises: &[ExerciseWithTests]) -> (Vec<Candidate>, TestSuite) {
    let mut candidates = Vec::new();
    let mut suite = TestSuite::new();

    for exercise in exercises {
        for solution in &exercise.solutions {
            candidates.push(Candidate {
                task_id: exercise.exercise_id.clone(),
                prompt: exercise.problem.clone(),
                completion: truncate_completion(solution),
            });
        }

        let Some(entry_point) = function_name(&exercise.problem) else {
            warn!(exercise_id = %exercise.exercise_id, "no entry point in problem");
            continue;
        };
        for raw in &exercise.tests {
            let batch = extract_assertions(raw, entry_point);
            if !batch.is_empty() {
                suite.add_batch(exercise.exercise_id.clone(), batch);
            }
        }
    }

    (candidates, suite)
}
