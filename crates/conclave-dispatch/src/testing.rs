//! Deterministic executors for tests and demos.
//!
//! [`ScriptedExecutor`] decides each outcome from the task itself, so tests
//! can state durations and failures next to the task they describe:
//!
//! ```
//! use conclave_dispatch::Task;
//! use serde_json::json;
//!
//! let slow = Task::new("analysis", "slow one").with_data(json!({"durationMs": 200}));
//! let broken = Task::new("analysis", "broken").with_data(json!({"fail": "model offline"}));
//! # let _ = (slow, broken);
//! ```

use crate::executor::{ExecutionOutput, Executor};
use crate::registry::Worker;
use crate::task::Task;
use crate::types::{TaskId, WorkerId};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scripted behaviour for every task of one type.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub duration_ms: u64,
    pub fail: Option<String>,
    pub output: Option<Value>,
}

impl Script {
    pub fn succeed(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Default::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            fail: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

/// Executor whose outcomes are read from task data or per-type scripts.
///
/// Task data keys take precedence over scripts:
/// - `durationMs`: reported duration
/// - `fail`: error message (or `true`) to fail with
/// - `output`: output value to return
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    failing_workers: HashSet<WorkerId>,
    worker_outputs: HashMap<WorkerId, Value>,
    sleep: bool,
    calls: Mutex<Vec<(WorkerId, TaskId)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script every task of `task_type`.
    pub fn with_script(mut self, task_type: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(task_type.into(), script);
        self
    }

    /// Fail every task that lands on `worker_id`.
    pub fn with_failing_worker(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.failing_workers.insert(worker_id.into());
        self
    }

    /// Return `output` for every task that lands on `worker_id`.
    pub fn with_worker_output(mut self, worker_id: impl Into<WorkerId>, output: Value) -> Self {
        self.worker_outputs.insert(worker_id.into(), output);
        self
    }

    /// Actually wait for the scripted duration (pair with paused tokio time).
    pub fn sleeping(mut self) -> Self {
        self.sleep = true;
        self
    }

    /// `(worker, task)` pairs in the order executions started.
    pub fn calls(&self) -> Vec<(WorkerId, TaskId)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of executions observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn resolve(&self, worker: &Worker, task: &Task) -> Script {
        let mut script = self.scripts.get(&task.task_type).cloned().unwrap_or_default();

        if let Some(ms) = task.data.get("durationMs").and_then(Value::as_u64) {
            script.duration_ms = ms;
        }
        match task.data.get("fail") {
            Some(Value::String(message)) => script.fail = Some(message.clone()),
            Some(Value::Bool(true)) => script.fail = Some("scripted failure".to_string()),
            _ => {}
        }
        if let Some(output) = task.data.get("output") {
            script.output = Some(output.clone());
        }
        if self.failing_workers.contains(&worker.id) {
            script.fail = Some(format!("worker {} is scripted to fail", worker.id));
        }
        if let Some(output) = self.worker_outputs.get(&worker.id) {
            script.output = Some(output.clone());
        }
        script
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        worker: &Worker,
        task: &Task,
        cancel: CancellationToken,
    ) -> anyhow::Result<ExecutionOutput> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((worker.id.clone(), task.id.clone()));

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let script = self.resolve(worker, task);

        if self.sleep && script.duration_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(script.duration_ms)) => {}
                _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            }
        }

        if let Some(message) = script.fail {
            anyhow::bail!(message);
        }

        let output = script.output.unwrap_or_else(|| {
            json!({
                "taskType": task.task_type,
                "worker": worker.id,
                "description": task.description,
            })
        });
        Ok(ExecutionOutput::new(output, script.duration_ms))
    }
}
