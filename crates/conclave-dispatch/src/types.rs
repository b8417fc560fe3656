//! Common types used across the dispatch core.

/// Caller-supplied identifier of a worker.
pub type WorkerId = String;

/// Identifier of a task (generated unless the caller supplies one).
pub type TaskId = String;

/// Identifier of a worker group.
pub type GroupId = String;

/// Identifier of a subtask produced by decomposition.
pub type SubtaskId = String;

/// Error types for dispatch operations.
///
/// Only structural precondition failures surface through this type. A task
/// that fails while running is reported inside its `TaskResult` instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("No eligible worker for task: {0}")]
    NoEligibleWorker(String),

    #[error("No available workers for {0} execution")]
    NoAvailableWorkers(String),

    #[error("Master worker not found: {0}")]
    UnknownMaster(WorkerId),

    #[error("No successful subtasks to merge for task: {0}")]
    NoSuccessfulSubtasks(TaskId),

    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn worker_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Worker",
            id: id.into(),
        }
    }

    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Group",
            id: id.into(),
        }
    }

    pub fn pool_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Pool",
            id: id.into(),
        }
    }

    /// Selection failures clear up once capacity frees, so callers should
    /// back off and retry rather than give up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoEligibleWorker(_) | DispatchError::NoAvailableWorkers(_)
        )
    }

    /// Short machine-readable code used at the JSON boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::NoEligibleWorker(_) => "no_eligible_worker",
            DispatchError::NoAvailableWorkers(_) => "no_available_workers",
            DispatchError::UnknownMaster(_) => "unknown_master",
            DispatchError::NoSuccessfulSubtasks(_) => "no_successful_subtasks",
            DispatchError::Cancelled(_) => "cancelled",
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
