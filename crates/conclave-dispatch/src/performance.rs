//! Rolling per-worker performance statistics.
//!
//! Records are owned by the registry (one per worker, created with it) so
//! that outcome updates are serialized with load accounting. The
//! [`PerformanceTracker`] handle is the narrow interface the dispatcher and
//! callers use to feed outcomes in and read statistics out.

use crate::registry::WorkerRegistry;
use crate::types::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Success rate above which a worker counts as healthy.
pub const HEALTHY_SUCCESS_RATE: f64 = 0.8;

/// A failure remembered in a worker's recent error window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Historical performance of a single worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    /// Running mean of execution latency
    pub rolling_average_latency_ms: f64,
    /// Most recent failures, oldest first
    pub recent_errors: VecDeque<ErrorEntry>,
}

impl PerformanceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome into the record.
    ///
    /// The latency mean is updated incrementally,
    /// `avg' = avg + (duration - avg) / n`, which stays accurate without a
    /// running sum that could grow without bound.
    pub fn record(
        &mut self,
        success: bool,
        duration_ms: u64,
        error: Option<&str>,
        error_limit: usize,
    ) {
        self.total_tasks += 1;
        if success {
            self.successful_tasks += 1;
        } else if let Some(message) = error {
            self.recent_errors.push_back(ErrorEntry {
                timestamp: Utc::now(),
                message: message.to_string(),
            });
            while self.recent_errors.len() > error_limit {
                self.recent_errors.pop_front();
            }
        }

        let n = self.total_tasks as f64;
        self.rolling_average_latency_ms += (duration_ms as f64 - self.rolling_average_latency_ms) / n;
    }

    /// `successful / max(total, 1)`, always within `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        self.successful_tasks as f64 / self.total_tasks.max(1) as f64
    }

    pub fn is_healthy(&self) -> bool {
        self.success_rate() > HEALTHY_SUCCESS_RATE
    }
}

/// Aggregate statistics over a set of workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_workers: usize,
    /// Workers currently marked busy
    pub active_workers: usize,
    pub average_success_rate: f64,
    pub total_tasks_processed: u64,
    /// Share of workers whose success rate exceeds the health threshold
    pub system_health: f64,
    /// Tasks between queueing and completion
    pub in_flight: usize,
}

impl SystemStats {
    /// Aggregate `(busy, record)` pairs. An empty set is reported as fully
    /// healthy rather than dividing by zero.
    pub fn aggregate<'a, I>(records: I, in_flight: usize) -> Self
    where
        I: IntoIterator<Item = (bool, &'a PerformanceRecord)>,
    {
        let mut total_workers = 0;
        let mut active_workers = 0;
        let mut success_sum = 0.0;
        let mut total_tasks_processed = 0;
        let mut healthy = 0;

        for (busy, record) in records {
            total_workers += 1;
            if busy {
                active_workers += 1;
            }
            success_sum += record.success_rate();
            total_tasks_processed += record.total_tasks;
            if record.is_healthy() {
                healthy += 1;
            }
        }

        let (average_success_rate, system_health) = if total_workers == 0 {
            (1.0, 1.0)
        } else {
            (
                success_sum / total_workers as f64,
                healthy as f64 / total_workers as f64,
            )
        };

        Self {
            total_workers,
            active_workers,
            average_success_rate,
            total_tasks_processed,
            system_health,
            in_flight,
        }
    }
}

/// Handle for recording outcomes and reading performance.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    registry: Arc<WorkerRegistry>,
}

impl PerformanceTracker {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self { registry }
    }

    /// Record the outcome of one execution on `worker_id`.
    pub fn record_outcome(
        &self,
        worker_id: &str,
        success: bool,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        self.registry
            .record_outcome(worker_id, success, duration_ms, error)
    }

    /// Snapshot of a worker's record.
    pub fn record(&self, worker_id: &str) -> Result<PerformanceRecord> {
        self.registry.performance(worker_id)
    }

    pub fn success_rate(&self, worker_id: &str) -> Result<f64> {
        Ok(self.record(worker_id)?.success_rate())
    }

    /// Aggregate statistics over every registered worker.
    pub fn system_stats(&self, in_flight: usize) -> SystemStats {
        let snapshot = self.registry.snapshot();
        SystemStats::aggregate(
            snapshot.iter().map(|(w, p)| (w.is_busy(), p)),
            in_flight,
        )
    }
}
