//! Worker pools: interchangeable registries sharing one dispatch core.
//!
//! Each framework flavour (native, AutoGen, SuperAgent, CrewAI, Semantic
//! Kernel) is just a [`ManagedPool`] of a different [`PoolKind`]. They all
//! select, reserve and account for work the same way.

use crate::dispatcher::Dispatcher;
use crate::executor::Executor;
use crate::performance::SystemStats;
use crate::registry::{Worker, WorkerConfig};
use crate::state::OrchestratorState;
use crate::task::{Task, TaskResult};
use crate::types::{DispatchError, Result};
use async_trait::async_trait;
use conclave_config::DispatchConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PoolKind {
    #[serde(rename = "native")]
    Native,
    #[serde(rename = "autogen")]
    AutoGen,
    #[serde(rename = "superagent")]
    SuperAgent,
    #[serde(rename = "crewai")]
    CrewAi,
    #[serde(rename = "semantic-kernel")]
    SemanticKernel,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Native => "native",
            PoolKind::AutoGen => "autogen",
            PoolKind::SuperAgent => "superagent",
            PoolKind::CrewAi => "crewai",
            PoolKind::SemanticKernel => "semantic-kernel",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "native" => Ok(PoolKind::Native),
            "autogen" => Ok(PoolKind::AutoGen),
            "superagent" => Ok(PoolKind::SuperAgent),
            "crewai" => Ok(PoolKind::CrewAi),
            "semantic-kernel" | "semantickernel" => Ok(PoolKind::SemanticKernel),
            other => Err(DispatchError::InvalidRequest(format!("unknown pool kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub name: String,
    pub kind: PoolKind,
    #[serde(flatten)]
    pub system: SystemStats,
    /// Results currently held in the pool's history
    pub recorded_results: usize,
}

/// Uniform interface over a registry of workers.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> PoolKind;

    fn register_worker(&self, worker_id: &str, config: WorkerConfig) -> Result<Worker>;

    fn list_workers(&self) -> Vec<Worker>;

    /// Run `task` on a specific worker of this pool.
    async fn run_task(&self, worker_id: &str, task: &Task) -> Result<TaskResult>;

    fn stats(&self) -> PoolStats;
}

/// A pool backed by its own state and dispatcher.
#[derive(Debug, Clone)]
pub struct ManagedPool {
    name: String,
    kind: PoolKind,
    dispatcher: Dispatcher,
}

impl ManagedPool {
    pub fn new(
        name: impl Into<String>,
        kind: PoolKind,
        config: DispatchConfig,
        executor: Arc<dyn Executor>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(OrchestratorState::new(config));
        Self::with_state(name, kind, state, executor, cancel)
    }

    pub fn with_state(
        name: impl Into<String>,
        kind: PoolKind,
        state: Arc<OrchestratorState>,
        executor: Arc<dyn Executor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            dispatcher: Dispatcher::new(state, executor, cancel),
        }
    }

    /// Full strategy access for this pool.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[async_trait]
impl WorkerPool for ManagedPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PoolKind {
        self.kind
    }

    fn register_worker(&self, worker_id: &str, config: WorkerConfig) -> Result<Worker> {
        self.dispatcher.state().registry.register(worker_id, config)
    }

    fn list_workers(&self) -> Vec<Worker> {
        self.dispatcher.state().registry.list()
    }

    async fn run_task(&self, worker_id: &str, task: &Task) -> Result<TaskResult> {
        // surface unknown workers instead of waiting on them
        self.dispatcher.state().registry.get(worker_id)?;
        self.dispatcher.execute_on(worker_id, task).await
    }

    fn stats(&self) -> PoolStats {
        let state = self.dispatcher.state();
        PoolStats {
            name: self.name.clone(),
            kind: self.kind,
            system: state.stats(),
            recorded_results: state.results.len(),
        }
    }
}

/// Named collection of pools.
#[derive(Default, Clone)]
pub struct PoolSet {
    pools: BTreeMap<String, Arc<dyn WorkerPool>>,
}

impl fmt::Debug for PoolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.pools.keys()).finish()
    }
}

impl PoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pool, replacing any pool with the same name.
    pub fn insert(&mut self, pool: Arc<dyn WorkerPool>) {
        let name = pool.name().to_string();
        if self.pools.insert(name.clone(), pool).is_some() {
            tracing::warn!("Pool {} replaced", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn WorkerPool>> {
        self.pools
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::pool_not_found(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Stats for every pool, ordered by name.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.values().map(|p| p.stats()).collect()
    }

    /// Name of the first pool (by name) holding `worker_id`.
    pub fn locate_worker(&self, worker_id: &str) -> Option<String> {
        self.pools
            .iter()
            .find(|(_, pool)| pool.list_workers().iter().any(|w| w.id == worker_id))
            .map(|(name, _)| name.clone())
    }
}
