//! System load signals and the rules that turn them into a strategy choice.

use crate::dispatcher::Strategy;
use crate::registry::Worker;
use crate::task::Task;
use conclave_config::{AdaptiveConfig, IntelligentConfig};
use serde::{Deserialize, Serialize};

/// Point-in-time load over a set of workers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadMetrics {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub available_workers: usize,
    /// `busy / total`; 1.0 when there are no workers at all
    pub system_load: f64,
}

impl LoadMetrics {
    pub fn from_workers(workers: &[Worker]) -> Self {
        let total_workers = workers.len();
        let busy_workers = workers.iter().filter(|w| w.is_busy()).count();
        let system_load = if total_workers == 0 {
            1.0
        } else {
            busy_workers as f64 / total_workers as f64
        };

        Self {
            total_workers,
            busy_workers,
            available_workers: total_workers - busy_workers,
            system_load,
        }
    }
}

/// Pick a strategy for `tasks` under the current load.
///
/// Rules are checked in order: light load with more than one task runs in
/// parallel; plenty of spare workers runs distributed; any critical task
/// runs in priority order; everything else runs sequentially.
pub fn choose_adaptive(metrics: &LoadMetrics, tasks: &[Task], thresholds: &AdaptiveConfig) -> Strategy {
    let task_count = tasks.len();

    if metrics.system_load < thresholds.parallel_load_ceiling && task_count > 1 {
        Strategy::Parallel
    } else if metrics.available_workers as f64 > thresholds.distributed_factor * task_count as f64 {
        Strategy::Distributed
    } else if tasks.iter().any(|t| t.critical) {
        Strategy::Priority
    } else {
        Strategy::Sequential
    }
}

/// What a workflow should be optimised for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    Speed,
    #[default]
    Balanced,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConstraints {
    #[serde(default, alias = "limited_resources")]
    pub limited_resources: bool,
}

/// A batch of tasks plus hints for the intelligent strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub constraints: WorkflowConstraints,
    #[serde(default)]
    pub optimization: Optimization,
}

impl Workflow {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            constraints: WorkflowConstraints::default(),
            optimization: Optimization::default(),
        }
    }

    pub fn with_optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn with_limited_resources(mut self) -> Self {
        self.constraints.limited_resources = true;
        self
    }

    /// Complexity is the number of tasks in the workflow.
    pub fn complexity(&self) -> usize {
        self.tasks.len()
    }
}

/// Pick a strategy for a workflow. Returns [`Strategy::Adaptive`] when the
/// decision should be deferred to live load.
pub fn choose_intelligent(workflow: &Workflow, thresholds: &IntelligentConfig) -> Strategy {
    if workflow.complexity() > thresholds.complex_workflow_threshold
        && workflow.optimization == Optimization::Speed
    {
        Strategy::Parallel
    } else if workflow.constraints.limited_resources {
        Strategy::Sequential
    } else {
        Strategy::Adaptive
    }
}
