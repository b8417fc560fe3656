//! In-flight task tracking and bounded result history.

use crate::task::{TaskResult, TaskState};
use crate::types::{TaskId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Where a task is in its lifecycle and who holds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTask {
    pub task_id: TaskId,
    pub state: TaskState,
    pub worker_id: Option<WorkerId>,
    pub updated_at: DateTime<Utc>,
}

/// Handle to one tracked execution.
///
/// Task ids are caller-supplied and may repeat within a batch, so each
/// execution is tracked under its own ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
struct TrackerState {
    next: u64,
    tasks: HashMap<Ticket, TrackedTask>,
}

/// Tracks every execution between queueing and its terminal state.
///
/// Terminal executions are dropped from the tracker; their results live in
/// the [`ResultLog`].
#[derive(Debug, Default)]
pub struct TaskTracker {
    state: Mutex<TrackerState>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an execution of `task_id`.
    pub fn queued(&self, task_id: &str) -> Ticket {
        let mut state = self.lock();
        let ticket = Ticket(state.next);
        state.next += 1;
        state.tasks.insert(
            ticket,
            TrackedTask {
                task_id: task_id.to_string(),
                state: TaskState::Queued,
                worker_id: None,
                updated_at: Utc::now(),
            },
        );
        tracing::trace!("Task {} -> Queued", task_id);
        ticket
    }

    pub fn assigned(&self, ticket: Ticket, worker_id: &str) {
        self.transition(ticket, TaskState::Assigned, Some(worker_id));
    }

    pub fn running(&self, ticket: Ticket) {
        self.transition(ticket, TaskState::Running, None);
    }

    /// Move to `Succeeded` or `Failed` and stop tracking.
    pub fn finished(&self, ticket: Ticket, success: bool) {
        let state = if success {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        self.transition(ticket, state, None);
    }

    /// Drop an execution that never reached an executor (e.g. no eligible
    /// worker).
    pub fn abandon(&self, ticket: Ticket) {
        self.lock().tasks.remove(&ticket);
    }

    fn transition(&self, ticket: Ticket, state: TaskState, worker_id: Option<&str>) {
        let mut tracker = self.lock();
        if state.is_terminal() {
            if let Some(tracked) = tracker.tasks.remove(&ticket) {
                tracing::trace!("Task {} -> {:?}", tracked.task_id, state);
            }
            return;
        }

        let Some(entry) = tracker.tasks.get_mut(&ticket) else {
            tracing::warn!("Transition to {:?} for untracked ticket {:?}", state, ticket);
            return;
        };
        entry.state = state;
        entry.updated_at = Utc::now();
        if let Some(worker_id) = worker_id {
            entry.worker_id = Some(worker_id.to_string());
        }
        tracing::trace!("Task {} -> {:?}", entry.task_id, state);
    }

    pub fn get(&self, ticket: Ticket) -> Option<TrackedTask> {
        self.lock().tasks.get(&ticket).cloned()
    }

    /// Every live execution of `task_id`.
    pub fn by_task(&self, task_id: &str) -> Vec<TrackedTask> {
        self.lock()
            .tasks
            .values()
            .filter(|t| t.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().tasks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The most recent task results, oldest evicted first.
#[derive(Debug)]
pub struct ResultLog {
    limit: usize,
    results: Mutex<VecDeque<TaskResult>>,
}

impl ResultLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            results: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
        }
    }

    pub fn push(&self, result: TaskResult) {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        results.push_back(result);
        while results.len() > self.limit {
            results.pop_front();
        }
    }

    /// Up to `n` most recent results, newest last.
    pub fn recent(&self, n: usize) -> Vec<TaskResult> {
        let results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = results.len().saturating_sub(n);
        results.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use serde_json::json;

    #[test]
    fn test_lifecycle() {
        let tracker = TaskTracker::new();
        let ticket = tracker.queued("t1");
        assert_eq!(tracker.get(ticket).unwrap().state, TaskState::Queued);

        tracker.assigned(ticket, "w1");
        tracker.running(ticket);
        let tracked = tracker.get(ticket).unwrap();
        assert_eq!(tracked.state, TaskState::Running);
        assert_eq!(tracked.worker_id.as_deref(), Some("w1"));
        assert_eq!(tracker.in_flight(), 1);

        tracker.finished(ticket, true);
        assert!(tracker.get(ticket).is_none());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_abandon() {
        let tracker = TaskTracker::new();
        let ticket = tracker.queued("t1");
        tracker.abandon(ticket);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_repeated_task_ids_tracked_separately() {
        let tracker = TaskTracker::new();
        let first = tracker.queued("dup");
        let second = tracker.queued("dup");
        tracker.running(first);
        tracker.running(second);
        assert_eq!(tracker.by_task("dup").len(), 2);

        tracker.finished(first, true);
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(tracker.get(second).unwrap().state, TaskState::Running);

        tracker.finished(second, false);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_result_log_is_bounded() {
        let log = ResultLog::new(2);
        let task = Task::new("t", "");
        for i in 0..5u64 {
            log.push(TaskResult::succeeded(&task, "w", json!(i), i));
        }

        assert_eq!(log.len(), 2);
        let recent = log.recent(10);
        assert_eq!(recent[0].output, Some(json!(3)));
        assert_eq!(recent[1].output, Some(json!(4)));
        assert_eq!(log.recent(1)[0].output, Some(json!(4)));
    }
}
