//! Capability-aware worker selection and multi-strategy task dispatch.
//!
//! This crate provides:
//! - A worker registry with atomic select-and-reserve and drop-released slots
//! - Rolling per-worker performance records that feed back into scoring
//! - Sequential, hierarchical, parallel, distributed, priority, adaptive and
//!   intelligent dispatch strategies
//! - Worker groups with task decomposition, coordinated execution, result
//!   merging and consensus
//! - Worker pools that share one dispatch core across framework flavours

pub mod collaboration;
pub mod dispatcher;
pub mod executor;
pub mod load;
pub mod orchestrator;
pub mod performance;
pub mod pool;
pub mod registry;
pub mod scoring;
pub mod state;
pub mod task;
pub mod testing;
pub mod tracking;
pub mod types;

pub use collaboration::{
    AssignmentStrategy, CollaborationNetwork, CollaborationOptions, CollaborationStrategy,
    CollaborationType, CollaborativeReport, ConsensusResult, Connection, MergedResult, Subtask,
    SyncMode, WorkerGroup,
};
pub use dispatcher::{DispatchReport, Dispatcher, Strategy};
pub use executor::{ExecutionOutput, Executor, SimulatedExecutor};
pub use load::{LoadMetrics, Optimization, Workflow, WorkflowConstraints};
pub use orchestrator::{Orchestrator, PRIMARY_POOL};
pub use performance::{PerformanceRecord, PerformanceTracker, SystemStats};
pub use pool::{ManagedPool, PoolKind, PoolSet, PoolStats, WorkerPool};
pub use registry::{Reservation, Worker, WorkerConfig, WorkerRegistry, WorkerStatus};
pub use state::OrchestratorState;
pub use task::{Task, TaskError, TaskErrorKind, TaskResult, TaskState};
pub use tracking::{ResultLog, TaskTracker, Ticket, TrackedTask};
pub use types::{DispatchError, GroupId, Result, SubtaskId, TaskId, WorkerId};

pub use tokio_util::sync::CancellationToken;
