//! Top-level facade tying registry, dispatcher, collaboration and pools
//! together under one lifecycle.

use crate::collaboration::CollaborationNetwork;
use crate::dispatcher::Dispatcher;
use crate::executor::Executor;
use crate::performance::{PerformanceTracker, SystemStats};
use crate::pool::{ManagedPool, PoolKind, PoolSet, PoolStats, WorkerPool};
use crate::registry::{Worker, WorkerConfig, WorkerRegistry};
use crate::state::OrchestratorState;
use crate::task::TaskResult;
use crate::types::{DispatchError, Result};
use conclave_config::{AppConfig, WorkerSeed};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Name of the pool backing the orchestrator's own registry.
pub const PRIMARY_POOL: &str = "primary";

impl From<&WorkerSeed> for WorkerConfig {
    fn from(seed: &WorkerSeed) -> Self {
        WorkerConfig {
            display_name: seed.display_name.clone(),
            capabilities: seed.capabilities.iter().cloned().collect(),
            priority: seed.priority,
            max_concurrency: seed.max_concurrency,
        }
    }
}

fn validate_worker_id(worker_id: &str) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(DispatchError::InvalidRequest("worker id must not be empty".to_string()));
    }
    Ok(())
}

/// One independent orchestration instance.
///
/// Construction seeds every configured pool; [`shutdown`](Self::shutdown)
/// cancels all in-flight work, which then resolves as cancelled and
/// releases its worker slots.
#[derive(Debug)]
pub struct Orchestrator {
    state: Arc<OrchestratorState>,
    dispatcher: Dispatcher,
    network: CollaborationNetwork,
    pools: PoolSet,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Build an orchestrator from configuration.
    ///
    /// Workers seeded into a pool named [`PRIMARY_POOL`] join the
    /// orchestrator's own registry; every other entry creates a separate pool.
    pub fn new(config: AppConfig, executor: Arc<dyn Executor>) -> Result<Self> {
        let cancel = CancellationToken::new();
        let state = Arc::new(OrchestratorState::new(config.dispatch.clone()));
        let dispatcher = Dispatcher::new(Arc::clone(&state), Arc::clone(&executor), cancel.clone());
        let network = CollaborationNetwork::new(dispatcher.clone(), config.collaboration.clone());

        let primary = ManagedPool::with_state(
            PRIMARY_POOL,
            PoolKind::Native,
            Arc::clone(&state),
            Arc::clone(&executor),
            cancel.clone(),
        );
        let mut pools = PoolSet::new();
        pools.insert(Arc::new(primary));

        for pool_config in &config.pools {
            let kind: PoolKind = pool_config.kind.parse()?;

            let pool: Arc<dyn WorkerPool> = if pool_config.name == PRIMARY_POOL {
                pools.get(PRIMARY_POOL)?
            } else {
                let pool: Arc<dyn WorkerPool> = Arc::new(ManagedPool::new(
                    pool_config.name.clone(),
                    kind,
                    config.dispatch.clone(),
                    Arc::clone(&executor),
                    cancel.child_token(),
                ));
                pools.insert(Arc::clone(&pool));
                pool
            };

            for seed in &pool_config.workers {
                pool.register_worker(&seed.id, WorkerConfig::from(seed))?;
            }
            tracing::info!(
                "Seeded {} pool {} with {} workers",
                kind,
                pool_config.name,
                pool_config.workers.len()
            );
        }

        Ok(Self {
            state,
            dispatcher,
            network,
            pools,
            cancel,
        })
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.state.registry
    }

    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn network(&self) -> &CollaborationNetwork {
        &self.network
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    pub fn performance(&self) -> PerformanceTracker {
        self.state.performance()
    }

    /// Register a worker in the primary registry, keeping any existing
    /// performance history.
    pub fn register_worker(&self, worker_id: &str, config: WorkerConfig) -> Result<Worker> {
        validate_worker_id(worker_id)?;
        self.pools.get(PRIMARY_POOL)?.register_worker(worker_id, config)
    }

    /// Register a worker in the primary registry with a fresh performance
    /// record.
    pub fn register_worker_with_reset(&self, worker_id: &str, config: WorkerConfig) -> Result<Worker> {
        validate_worker_id(worker_id)?;
        self.state.registry.register_with_reset(worker_id, config)
    }

    pub fn stats(&self) -> SystemStats {
        self.state.stats()
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats()
    }

    pub fn recent_results(&self, n: usize) -> Vec<TaskResult> {
        self.state.results.recent(n)
    }

    /// Cancel all in-flight and queued work in this orchestrator and its pools.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator ({} tasks in flight)", self.state.tracker.in_flight());
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::testing::ScriptedExecutor;

    fn orchestrator(config: AppConfig) -> Orchestrator {
        Orchestrator::new(config, Arc::new(ScriptedExecutor::new())).unwrap()
    }

    #[test]
    fn test_seeds_pools_from_config() {
        let config = AppConfig::from_toml_str(
            r#"
            [[pools]]
            name = "primary"

            [[pools.workers]]
            id = "native-1"
            capabilities = ["analysis"]

            [[pools]]
            name = "crew"
            kind = "crewai"

            [[pools.workers]]
            id = "researcher"
            priority = 8
            max_concurrency = 2
            "#,
        )
        .unwrap();

        let orchestrator = orchestrator(config);
        assert!(orchestrator.registry().contains("native-1"));
        assert!(!orchestrator.registry().contains("researcher"));

        let crew = orchestrator.pools().get("crew").unwrap();
        assert_eq!(crew.kind(), PoolKind::CrewAi);
        assert_eq!(crew.list_workers()[0].max_concurrency, 2);
        assert_eq!(orchestrator.pool_stats().len(), 2);
    }

    #[test]
    fn test_unknown_pool_kind() {
        let config = AppConfig::from_toml_str(
            r#"
            [[pools]]
            name = "x"
            kind = "langgraph"
            "#,
        )
        .unwrap();

        let err = Orchestrator::new(config, Arc::new(ScriptedExecutor::new())).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_work() {
        let orchestrator = orchestrator(AppConfig::default());
        orchestrator
            .register_worker("w", WorkerConfig::new("W"))
            .unwrap();

        orchestrator.shutdown();
        assert!(orchestrator.is_shut_down());

        let result = orchestrator
            .dispatcher()
            .execute_task(&Task::new("t", ""))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(orchestrator.registry().get("w").unwrap().current_load, 0);
    }

    #[test]
    fn test_empty_worker_id_rejected() {
        let orchestrator = orchestrator(AppConfig::default());
        assert!(orchestrator.register_worker("  ", WorkerConfig::default()).is_err());
    }
}
