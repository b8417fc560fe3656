//! Worker ranking for task assignment.
//!
//! A worker's score for a task is a fixed blend of four signals:
//!
//! ```text
//! 0.4 * capability match + 0.3 * success rate + 0.2 * speed + 0.1 * priority
//! ```
//!
//! Scores are pure functions of the worker, its performance record, and the
//! task, so repeated scoring without intervening state changes is stable.

use crate::performance::PerformanceRecord;
use crate::registry::Worker;
use crate::task::Task;
use crate::types::WorkerId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const CAPABILITY_WEIGHT: f64 = 0.4;
pub const PERFORMANCE_WEIGHT: f64 = 0.3;
pub const SPEED_WEIGHT: f64 = 0.2;
pub const PRIORITY_WEIGHT: f64 = 0.1;

/// Declared priorities are clamped into `[0, MAX_PRIORITY]` before
/// normalisation.
pub const MAX_PRIORITY: i32 = 10;

/// Fraction of the task's required capabilities the worker holds.
pub fn capability_match(worker: &Worker, task: &Task) -> f64 {
    if task.required_capabilities.is_empty() {
        return 1.0;
    }

    let matched = task
        .required_capabilities
        .intersection(&worker.capabilities)
        .count();
    matched as f64 / task.required_capabilities.len() as f64
}

/// Inverse of the rolling latency; sub-millisecond averages count as 1ms.
pub fn speed_score(performance: &PerformanceRecord) -> f64 {
    1.0 / performance.rolling_average_latency_ms.max(1.0)
}

pub fn normalized_priority(priority: i32) -> f64 {
    priority.clamp(0, MAX_PRIORITY) as f64 / MAX_PRIORITY as f64
}

/// Score `worker` for `task`.
pub fn score(worker: &Worker, performance: &PerformanceRecord, task: &Task) -> f64 {
    CAPABILITY_WEIGHT * capability_match(worker, task)
        + PERFORMANCE_WEIGHT * performance.success_rate()
        + SPEED_WEIGHT * speed_score(performance)
        + PRIORITY_WEIGHT * normalized_priority(worker.priority)
}

/// A worker together with its score for a particular task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoredWorker {
    pub worker_id: WorkerId,
    pub score: f64,
    pub current_load: u32,
    pub registration_order: u64,
}

impl ScoredWorker {
    /// Best first: higher score, then lighter load, then earlier registration.
    fn rank_order(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.current_load.cmp(&other.current_load))
            .then(self.registration_order.cmp(&other.registration_order))
    }
}

/// Score every candidate and sort best first.
pub fn rank<'a, I>(candidates: I, task: &Task) -> Vec<ScoredWorker>
where
    I: IntoIterator<Item = (&'a Worker, &'a PerformanceRecord)>,
{
    let mut ranked: Vec<ScoredWorker> = candidates
        .into_iter()
        .map(|(worker, performance)| ScoredWorker {
            worker_id: worker.id.clone(),
            score: score(worker, performance, task),
            current_load: worker.current_load,
            registration_order: worker.registration_order,
        })
        .collect();

    ranked.sort_by(ScoredWorker::rank_order);
    ranked
}

/// The best candidate, if any.
pub fn best<'a, I>(candidates: I, task: &Task) -> Option<ScoredWorker>
where
    I: IntoIterator<Item = (&'a Worker, &'a PerformanceRecord)>,
{
    rank(candidates, task).into_iter().next()
}
