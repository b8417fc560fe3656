//! Explicit state shared by the components of one orchestrator.
//!
//! Nothing in the dispatch core is global: two `OrchestratorState`s never
//! see each other's workers, tasks or history.

use crate::performance::{PerformanceTracker, SystemStats};
use crate::registry::WorkerRegistry;
use crate::tracking::{ResultLog, TaskTracker};
use conclave_config::DispatchConfig;
use std::sync::Arc;

#[derive(Debug)]
pub struct OrchestratorState {
    pub registry: Arc<WorkerRegistry>,
    pub tracker: TaskTracker,
    pub results: ResultLog,
    pub config: DispatchConfig,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl OrchestratorState {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            registry: Arc::new(WorkerRegistry::new(config.recent_error_limit)),
            tracker: TaskTracker::new(),
            results: ResultLog::new(config.history_limit),
            config,
        }
    }

    pub fn performance(&self) -> PerformanceTracker {
        PerformanceTracker::new(Arc::clone(&self.registry))
    }

    pub fn stats(&self) -> SystemStats {
        self.performance().system_stats(self.tracker.in_flight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerConfig;

    #[test]
    fn test_instances_are_independent() {
        let a = OrchestratorState::default();
        let b = OrchestratorState::default();

        a.registry.register("w1", WorkerConfig::new("One")).unwrap();
        assert_eq!(a.stats().total_workers, 1);
        assert_eq!(b.stats().total_workers, 0);
        assert!(b.registry.get("w1").is_err());
    }

    #[test]
    fn test_limits_come_from_config() {
        let config = DispatchConfig {
            recent_error_limit: 2,
            ..Default::default()
        };
        let state = OrchestratorState::new(config);
        state.registry.register("w", WorkerConfig::default()).unwrap();
        for i in 0..5 {
            state
                .registry
                .record_outcome("w", false, 1, Some(&format!("e{}", i)))
                .unwrap();
        }

        assert_eq!(state.registry.performance("w").unwrap().recent_errors.len(), 2);
    }
}
