//! The executor contract: how a task actually runs on a worker.
//!
//! The dispatch core never performs work itself. It reserves a worker, hands
//! the task to an [`Executor`], and turns whatever comes back (output,
//! error, cancellation or deadline) into a [`TaskResult`].

use crate::registry::Worker;
use crate::task::{Task, TaskError, TaskErrorKind, TaskResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What an executor returns for a successful run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub output: Value,
    /// Reported execution time, used for statistics and strategy totals
    pub duration_ms: u64,
}

impl ExecutionOutput {
    pub fn new(output: Value, duration_ms: u64) -> Self {
        Self {
            output,
            duration_ms,
        }
    }
}

/// Runs one task on one worker.
///
/// Implementations should observe `cancel` at their await points. The
/// dispatcher also races the call against the token and any deadline, so an
/// executor that ignores it is still abandoned promptly.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        worker: &Worker,
        task: &Task,
        cancel: CancellationToken,
    ) -> anyhow::Result<ExecutionOutput>;
}

/// Run `task` on `worker` and fold every outcome into a [`TaskResult`].
///
/// Errors never escape: executor failures, cancellation and deadline expiry
/// all come back as failed results with the matching [`TaskErrorKind`].
pub async fn run_guarded(
    executor: &dyn Executor,
    worker: &Worker,
    task: &Task,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> TaskResult {
    let started = Instant::now();
    let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;

    if cancel.is_cancelled() {
        return TaskResult::failed(
            task,
            &worker.id,
            TaskError::new(TaskErrorKind::Cancelled, "cancelled before start"),
            0,
        );
    }

    let child = cancel.child_token();
    let run = executor.execute(worker, task, child.clone());

    let outcome = match deadline {
        Some(limit) => {
            tokio::select! {
                res = run => Some(res),
                _ = cancel.cancelled() => None,
                _ = tokio::time::sleep(limit) => {
                    child.cancel();
                    tracing::warn!(
                        "Task {} on worker {} exceeded deadline of {}ms",
                        task.id,
                        worker.id,
                        limit.as_millis()
                    );
                    return TaskResult::failed(
                        task,
                        &worker.id,
                        TaskError::new(
                            TaskErrorKind::TimedOut,
                            format!("deadline of {}ms exceeded", limit.as_millis()),
                        ),
                        elapsed_ms(started),
                    );
                }
            }
        }
        None => {
            tokio::select! {
                res = run => Some(res),
                _ = cancel.cancelled() => None,
            }
        }
    };

    match outcome {
        Some(Ok(done)) => TaskResult::succeeded(task, &worker.id, done.output, done.duration_ms),
        // an executor that bailed because its token fired was cancelled
        Some(Err(_)) if cancel.is_cancelled() => {
            tracing::info!("Task {} on worker {} cancelled", task.id, worker.id);
            TaskResult::failed(
                task,
                &worker.id,
                TaskError::new(TaskErrorKind::Cancelled, "execution cancelled"),
                elapsed_ms(started),
            )
        }
        Some(Err(e)) => {
            tracing::warn!("Task {} failed on worker {}: {}", task.id, worker.id, e);
            TaskResult::failed(
                task,
                &worker.id,
                TaskError::new(TaskErrorKind::ExecutorFailure, format!("{:#}", e)),
                elapsed_ms(started),
            )
        }
        None => {
            child.cancel();
            tracing::info!("Task {} on worker {} cancelled", task.id, worker.id);
            TaskResult::failed(
                task,
                &worker.id,
                TaskError::new(TaskErrorKind::Cancelled, "execution cancelled"),
                elapsed_ms(started),
            )
        }
    }
}

/// Deterministic stand-in used when no inference backend is wired.
///
/// Waits a fixed delay, then echoes a templated result.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(
        &self,
        worker: &Worker,
        task: &Task,
        cancel: CancellationToken,
    ) -> anyhow::Result<ExecutionOutput> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => anyhow::bail!("simulation cancelled"),
            }
        }

        let output = json!({
            "taskType": task.task_type,
            "worker": worker.display_name,
            "result": format!(
                "{} completed {} task: {}",
                worker.display_name, task.task_type, task.description
            ),
            "data": task.data,
        });

        Ok(ExecutionOutput::new(
            output,
            started.elapsed().as_millis() as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerConfig;

    struct Failing;

    #[async_trait]
    impl Executor for Failing {
        async fn execute(
            &self,
            _worker: &Worker,
            _task: &Task,
            _cancel: CancellationToken,
        ) -> anyhow::Result<ExecutionOutput> {
            anyhow::bail!("model unavailable")
        }
    }

    struct Stalling;

    #[async_trait]
    impl Executor for Stalling {
        async fn execute(
            &self,
            _worker: &Worker,
            _task: &Task,
            _cancel: CancellationToken,
        ) -> anyhow::Result<ExecutionOutput> {
            // ignores its token on purpose
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ExecutionOutput::new(Value::Null, 0))
        }
    }

    fn worker() -> Worker {
        Worker::from_config("w1".to_string(), &WorkerConfig::new("Writer"), 0)
    }

    #[tokio::test]
    async fn test_simulated_output() {
        let task = Task::new("generation", "draft intro").with_data(json!({"k": 1}));
        let result = run_guarded(
            &SimulatedExecutor::default(),
            &worker(),
            &task,
            &CancellationToken::new(),
            None,
        )
        .await;

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["taskType"], "generation");
        assert_eq!(output["worker"], "Writer");
        assert_eq!(output["data"]["k"], 1);
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_result() {
        let task = Task::new("t", "");
        let result = run_guarded(&Failing, &worker(), &task, &CancellationToken::new(), None).await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(TaskErrorKind::ExecutorFailure));
        assert_eq!(result.error_message(), Some("model unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out() {
        let task = Task::new("t", "");
        let result = run_guarded(
            &Stalling,
            &worker(),
            &task,
            &CancellationToken::new(),
            Some(Duration::from_millis(50)),
        )
        .await;

        assert_eq!(result.error_kind(), Some(TaskErrorKind::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wins_over_stalled_executor() {
        let task = Task::new("t", "");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = run_guarded(&Stalling, &worker(), &task, &cancel, None).await;
        assert_eq!(result.error_kind(), Some(TaskErrorKind::Cancelled));
    }
}
