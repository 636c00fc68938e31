//! Consensus Selector
//!
//! Generated tests can be wrong, so no single assertion proves a
//! candidate correct. Agreement stands in for correctness: among the
//! candidates that ran to a pass, the one satisfying the most assertions
//! wins.

use std::collections::HashMap;

use verdict_common::types::ExecutionResult;

/// Best result among one task's executions
///
/// Only `passed` results compete. Score is the number of `true`
/// outcomes; a later result replaces the leader only with a strictly
/// higher score, so ties go to the first one seen. `None` when nothing
/// passed.
///
/// A passed result that satisfies no assertion still counts: with score
/// 0 it wins when nothing else passed. A running maximum seeded at 0
/// would reject it instead.
pub fn select_best<'a, I>(results: I) -> Option<&'a ExecutionResult>
where
    I: IntoIterator<Item = &'a ExecutionResult>,
{
    let mut best: Option<(&ExecutionResult, usize)> = None;

    for result in results.into_iter().filter(|r| r.passed) {
        let score = result.pass_count();
        match best {
            Some((_, leader)) if score <= leader => {}
            _ => best = Some((result, score)),
        }
    }

    best.map(|(result, _)| result)
}

/// Run `select_best` once per task, tasks in first-seen order
pub fn select_per_task(results: &[ExecutionResult]) -> Vec<(&str, Option<&ExecutionResult>)> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&ExecutionResult>> = HashMap::new();

    for result in results {
        let group = groups.entry(result.task_id.as_str()).or_insert_with(|| {
            order.push(result.task_id.as_str());
            Vec::new()
        });
        group.push(result);
    }

    order
        .into_iter()
        .map(|task_id| {
            let best = groups
                .get(task_id)
                .and_then(|group| select_best(group.iter().copied()));
            (task_id, best)
        })
        .collect()
}
