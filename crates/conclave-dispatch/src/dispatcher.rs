//! Multi-strategy task dispatch.
//!
//! Every strategy funnels through the same per-task path:
//!
//! ```text
//! Queued -> Assigned (slot reserved) -> Running (executor called) -> Succeeded | Failed
//! ```
//!
//! The reservation taken at `Assigned` is a guard that is dropped on every
//! exit path, so worker load is released whether the executor succeeds,
//! fails, times out or is cancelled.
//!
//! Only structural problems (unknown master, nothing eligible) fail a
//! dispatch call. A task that fails while running is reported in its
//! [`TaskResult`] and never aborts its siblings.

use crate::executor::{run_guarded, Executor};
use crate::load::{choose_adaptive, choose_intelligent, LoadMetrics, Workflow};
use crate::registry::{Reservation, Worker};
use crate::state::OrchestratorState;
use crate::task::{Task, TaskError, TaskErrorKind, TaskResult};
use crate::tracking::Ticket;
use crate::types::{DispatchError, Result, WorkerId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dispatch discipline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One task on the best worker
    Single,
    /// One task at a time, re-selecting per task
    Sequential,
    /// Sequential with an attributed coordinator
    Hierarchical,
    /// Round-robin over idle workers, run concurrently
    Parallel,
    /// Round-robin over every worker with spare capacity
    Distributed,
    /// Sequential, critical first then by descending priority
    Priority,
    /// Chosen from live load
    Adaptive,
    /// Chosen from workflow shape, falling back to adaptive
    Intelligent,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Single => "single",
            Strategy::Sequential => "sequential",
            Strategy::Hierarchical => "hierarchical",
            Strategy::Parallel => "parallel",
            Strategy::Distributed => "distributed",
            Strategy::Priority => "priority",
            Strategy::Adaptive => "adaptive",
            Strategy::Intelligent => "intelligent",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate outcome of a dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// Strategy the caller asked for
    pub requested: Strategy,
    /// Strategy that actually ran
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<WorkerId>,
    /// One result per task, in task order
    pub results: Vec<TaskResult>,
    /// Sum of durations for serial strategies, makespan for concurrent ones
    pub total_duration_ms: u64,
    /// Load observed when an adaptive choice was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadMetrics>,
}

impl DispatchReport {
    fn serial(strategy: Strategy, results: Vec<TaskResult>) -> Self {
        let total_duration_ms = results.iter().map(|r| r.duration_ms).sum();
        Self {
            requested: strategy,
            strategy,
            master: None,
            results,
            total_duration_ms,
            load: None,
        }
    }

    fn concurrent(strategy: Strategy, results: Vec<TaskResult>) -> Self {
        let total_duration_ms = results.iter().map(|r| r.duration_ms).max().unwrap_or(0);
        Self {
            requested: strategy,
            strategy,
            master: None,
            results,
            total_duration_ms,
            load: None,
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Runs tasks on workers from one [`OrchestratorState`].
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<OrchestratorState>,
    executor: Arc<dyn Executor>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.state.registry.len())
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        state: Arc<OrchestratorState>,
        executor: Arc<dyn Executor>,
        cancel: CancellationToken,
    ) -> Self {
        let deadline = state.config.default_deadline_ms.map(Duration::from_millis);
        Self {
            state,
            executor,
            cancel,
            deadline,
        }
    }

    /// Override the per-execution deadline.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one task on the best eligible worker.
    pub async fn execute_task(&self, task: &Task) -> Result<TaskResult> {
        let tracker = &self.state.tracker;
        let ticket = tracker.queued(&task.id);

        let reservation = match self.state.registry.select_and_reserve(task) {
            Ok(reservation) => reservation,
            Err(e) => {
                tracker.abandon(ticket);
                tracing::debug!("No worker for task {}: {}", task.id, e);
                return Err(e);
            }
        };

        tracker.assigned(ticket, reservation.worker_id());
        self.run_reserved(ticket, reservation, task).await
    }

    /// Run a task on a specific worker, waiting for a free slot if needed.
    ///
    /// Capabilities are not checked; the caller has already chosen the
    /// worker.
    pub async fn execute_on(&self, worker_id: &str, task: &Task) -> Result<TaskResult> {
        let tracker = &self.state.tracker;
        let ticket = tracker.queued(&task.id);

        match self.state.registry.reserve_wait(worker_id, &self.cancel).await {
            Ok(reservation) => {
                tracker.assigned(ticket, worker_id);
                self.run_reserved(ticket, reservation, task).await
            }
            Err(DispatchError::Cancelled(message)) => {
                tracker.finished(ticket, false);
                let result = TaskResult::failed(
                    task,
                    worker_id,
                    TaskError::new(TaskErrorKind::Cancelled, message),
                    0,
                );
                self.state.results.push(result.clone());
                Ok(result)
            }
            Err(e) => {
                tracker.abandon(ticket);
                Err(e)
            }
        }
    }

    async fn run_reserved(
        &self,
        ticket: Ticket,
        reservation: Reservation,
        task: &Task,
    ) -> Result<TaskResult> {
        let tracker = &self.state.tracker;
        let worker = match self
            .state
            .registry
            .mark_running(reservation.worker_id())
            .and_then(|_| reservation.worker())
        {
            Ok(worker) => worker,
            Err(e) => {
                tracker.abandon(ticket);
                return Err(e);
            }
        };
        tracker.running(ticket);

        let result = run_guarded(
            self.executor.as_ref(),
            &worker,
            task,
            &self.cancel,
            self.deadline,
        )
        .await;

        tracker.finished(ticket, result.success);

        // cancelled runs are not held against the worker
        if result.error_kind() != Some(TaskErrorKind::Cancelled) {
            self.state.registry.record_outcome(
                &worker.id,
                result.success,
                result.duration_ms,
                result.error_message(),
            )?;
        }

        self.state.results.push(result.clone());
        drop(reservation);

        tracing::debug!(
            "Task {} on worker {} finished: success={} duration={}ms",
            task.id,
            worker.id,
            result.success,
            result.duration_ms
        );
        Ok(result)
    }

    /// Run tasks one at a time in the given order, re-selecting per task.
    pub async fn execute_sequential(&self, tasks: &[Task]) -> Result<DispatchReport> {
        let results = self.run_serial(tasks).await?;
        Ok(DispatchReport::serial(Strategy::Sequential, results))
    }

    /// Sequential execution attributed to a coordinating master worker.
    pub async fn execute_hierarchical(&self, master_id: &str, tasks: &[Task]) -> Result<DispatchReport> {
        if !self.state.registry.contains(master_id) {
            return Err(DispatchError::UnknownMaster(master_id.to_string()));
        }

        tracing::info!("Hierarchical dispatch of {} tasks under {}", tasks.len(), master_id);
        let results = self.run_serial(tasks).await?;
        let mut report = DispatchReport::serial(Strategy::Hierarchical, results);
        report.master = Some(master_id.to_string());
        Ok(report)
    }

    /// Sequential over tasks ordered critical first, then by priority.
    pub async fn execute_priority(&self, tasks: &[Task]) -> Result<DispatchReport> {
        let mut ordered: Vec<&Task> = tasks.iter().collect();
        ordered.sort_by(|a, b| {
            b.critical
                .cmp(&a.critical)
                .then(b.priority.unwrap_or(0).cmp(&a.priority.unwrap_or(0)))
        });

        let mut results = Vec::with_capacity(ordered.len());
        for task in ordered {
            results.push(self.execute_task(task).await?);
        }
        Ok(DispatchReport::serial(Strategy::Priority, results))
    }

    async fn run_serial(&self, tasks: &[Task]) -> Result<Vec<TaskResult>> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(self.execute_task(task).await?);
        }
        Ok(results)
    }

    /// Round-robin tasks over a snapshot of idle workers and run them
    /// concurrently.
    pub async fn execute_parallel(&self, tasks: &[Task]) -> Result<DispatchReport> {
        let pool = self.state.registry.list_available();
        self.run_fanout(Strategy::Parallel, pool, tasks).await
    }

    /// Like parallel, but over every worker with spare capacity.
    pub async fn execute_distributed(&self, tasks: &[Task]) -> Result<DispatchReport> {
        let pool = self.state.registry.list_with_capacity();
        self.run_fanout(Strategy::Distributed, pool, tasks).await
    }

    async fn run_fanout(&self, strategy: Strategy, pool: Vec<Worker>, tasks: &[Task]) -> Result<DispatchReport> {
        if tasks.is_empty() {
            return Ok(DispatchReport::concurrent(strategy, Vec::new()));
        }
        if pool.is_empty() {
            return Err(DispatchError::NoAvailableWorkers(strategy.to_string()));
        }

        tracing::info!(
            "{} dispatch of {} tasks over {} workers",
            strategy,
            tasks.len(),
            pool.len()
        );

        let runs = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| self.execute_on(&pool[i % pool.len()].id, task));

        let results = join_all(runs).await.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(DispatchReport::concurrent(strategy, results))
    }

    /// Pick a strategy from live load and run it.
    pub async fn execute_adaptive(&self, tasks: &[Task]) -> Result<DispatchReport> {
        let metrics = LoadMetrics::from_workers(&self.state.registry.list());
        let chosen = choose_adaptive(&metrics, tasks, &self.state.config.adaptive);

        tracing::info!(
            "Adaptive dispatch chose {} (load {:.2}, {} available, {} tasks)",
            chosen,
            metrics.system_load,
            metrics.available_workers,
            tasks.len()
        );

        let mut report = self.run_chosen(chosen, tasks).await?;
        report.requested = Strategy::Adaptive;
        report.load = Some(metrics);
        Ok(report)
    }

    /// Pick a strategy from the workflow's shape, deferring to adaptive.
    pub async fn execute_intelligent(&self, workflow: &Workflow) -> Result<DispatchReport> {
        let chosen = choose_intelligent(workflow, &self.state.config.intelligent);
        tracing::info!(
            "Intelligent dispatch chose {} for {} tasks",
            chosen,
            workflow.complexity()
        );

        let mut report = match chosen {
            Strategy::Adaptive => self.execute_adaptive(&workflow.tasks).await?,
            other => self.run_chosen(other, &workflow.tasks).await?,
        };
        report.requested = Strategy::Intelligent;
        Ok(report)
    }

    async fn run_chosen(&self, strategy: Strategy, tasks: &[Task]) -> Result<DispatchReport> {
        match strategy {
            Strategy::Parallel => self.execute_parallel(tasks).await,
            Strategy::Distributed => self.execute_distributed(tasks).await,
            Strategy::Priority => self.execute_priority(tasks).await,
            _ => self.execute_sequential(tasks).await,
        }
    }

    /// Run `tasks` under `strategy`. Hierarchical dispatch needs a master
    /// and must go through [`execute_hierarchical`](Self::execute_hierarchical).
    pub async fn execute(&self, strategy: Strategy, tasks: &[Task]) -> Result<DispatchReport> {
        match strategy {
            Strategy::Single => {
                let task = match tasks {
                    [task] => task,
                    _ => {
                        return Err(DispatchError::InvalidRequest(format!(
                            "single dispatch takes exactly one task, got {}",
                            tasks.len()
                        )))
                    }
                };
                let result = self.execute_task(task).await?;
                Ok(DispatchReport::serial(Strategy::Single, vec![result]))
            }
            Strategy::Sequential => self.execute_sequential(tasks).await,
            Strategy::Hierarchical => Err(DispatchError::InvalidRequest(
                "hierarchical dispatch requires a master worker".to_string(),
            )),
            Strategy::Parallel => self.execute_parallel(tasks).await,
            Strategy::Distributed => self.execute_distributed(tasks).await,
            Strategy::Priority => self.execute_priority(tasks).await,
            Strategy::Adaptive => self.execute_adaptive(tasks).await,
            Strategy::Intelligent => self.execute_intelligent(&Workflow::new(tasks.to_vec())).await,
        }
    }
}
