//! Tasks and their results.

use crate::types::{TaskId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

/// A unit of work submitted for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    #[serde(default = "new_task_id")]
    pub id: TaskId,

    /// Type of task (e.g., "analysis", "generation")
    #[serde(rename = "type")]
    pub task_type: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Capabilities a worker must hold; empty matches any worker
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,

    /// Opaque payload handed to the executor
    #[serde(default)]
    pub data: serde_json::Value,

    /// Optional ordering weight, higher runs first under priority dispatch
    #[serde(default)]
    pub priority: Option<i32>,

    /// Critical tasks steer the adaptive strategy towards priority ordering
    #[serde(default)]
    pub critical: bool,

    /// Total time estimate, split across subtasks on decomposition
    #[serde(default)]
    pub estimated_time_ms: Option<u64>,
}

impl Task {
    /// Create a new task with a generated id.
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: new_task_id(),
            task_type: task_type.into(),
            description: description.into(),
            required_capabilities: BTreeSet::new(),
            data: serde_json::Value::Null,
            priority: None,
            critical: false,
            estimated_time_ms: None,
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set required capabilities.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Flag the task as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Set the time estimate.
    pub fn with_estimate_ms(mut self, estimate_ms: u64) -> Self {
        self.estimated_time_ms = Some(estimate_ms);
        self
    }

    /// Whether a worker holding `capabilities` satisfies every requirement.
    pub fn is_satisfied_by(&self, capabilities: &BTreeSet<String>) -> bool {
        self.required_capabilities.is_subset(capabilities)
    }
}

/// Why a single task execution failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The executor returned an error
    ExecutorFailure,
    /// The execution was cancelled through its token
    Cancelled,
    /// The execution outlived its deadline
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of running one task on one worker. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub task_type: String,
    pub worker_id: WorkerId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl TaskResult {
    pub(crate) fn succeeded(
        task: &Task,
        worker_id: &str,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            worker_id: worker_id.to_string(),
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn failed(task: &Task, worker_id: &str, error: TaskError, duration_ms: u64) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            worker_id: worker_id.to_string(),
            success: false,
            output: None,
            error: Some(error),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn error_kind(&self) -> Option<TaskErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Lifecycle of an in-flight task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker slot
    Queued,
    /// A worker slot is reserved
    Assigned,
    /// The executor is running
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}
