//! Worker registry with atomic selection and load reservation.
//!
//! Every worker has exactly one performance record, created with it and
//! stored next to it, so load changes and outcome updates happen under the
//! same lock. Selection plus reservation is a single critical section: two
//! concurrent selections can never both take a worker's last slot.
//!
//! A reservation is represented by a [`Reservation`] guard. Dropping the
//! guard releases the slot, which is what keeps load accounting balanced on
//! every exit path (success, failure, cancellation or panic).

use crate::performance::PerformanceRecord;
use crate::scoring::{self, ScoredWorker};
use crate::task::Task;
use crate::types::{DispatchError, Result, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Recent error window used when the registry is built without a config.
pub const DEFAULT_ERROR_LIMIT: usize = 50;

fn default_max_concurrency() -> u32 {
    1
}

/// Whether a worker is currently executing anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// Registration parameters for a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Human-readable name
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,

    /// Capability tags the worker offers
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Declared priority, normalised into [0, 1] when scoring
    #[serde(default)]
    pub priority: i32,

    /// Maximum simultaneous tasks
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            capabilities: BTreeSet::new(),
            priority: 0,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl WorkerConfig {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: Some(display_name.into()),
            ..Default::default()
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

/// A registered worker and its live load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: WorkerId,
    pub display_name: String,
    pub capabilities: BTreeSet<String>,
    pub priority: i32,
    pub max_concurrency: u32,
    /// Reserved slots, always `<= max_concurrency`
    pub current_load: u32,
    pub status: WorkerStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Position in registration order, used as the final tie-break
    pub registration_order: u64,
}

impl Worker {
    pub(crate) fn from_config(id: WorkerId, config: &WorkerConfig, order: u64) -> Self {
        Self {
            display_name: config.display_name.clone().unwrap_or_else(|| id.clone()),
            id,
            capabilities: config.capabilities.clone(),
            priority: config.priority,
            max_concurrency: config.max_concurrency,
            current_load: 0,
            status: WorkerStatus::Idle,
            last_used_at: None,
            registration_order: order,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrency
    }

    pub fn is_busy(&self) -> bool {
        self.status == WorkerStatus::Busy
    }

    /// Idle, below capacity and holding every capability the task requires.
    pub fn is_eligible_for(&self, task: &Task) -> bool {
        self.status == WorkerStatus::Idle && self.has_capacity() && task.is_satisfied_by(&self.capabilities)
    }
}

#[derive(Debug)]
struct WorkerEntry {
    worker: Worker,
    performance: PerformanceRecord,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<WorkerId, WorkerEntry>,
    next_order: u64,
}

impl RegistryState {
    fn entry_mut(&mut self, worker_id: &str) -> Result<&mut WorkerEntry> {
        self.entries
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))
    }

    /// Entries in registration order.
    fn ordered(&self) -> Vec<&WorkerEntry> {
        let mut entries: Vec<&WorkerEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.worker.registration_order);
        entries
    }
}

/// Registry of workers, their load and their performance.
#[derive(Debug)]
pub struct WorkerRegistry {
    state: RwLock<RegistryState>,
    capacity_freed: Notify,
    error_limit: usize,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LIMIT)
    }
}

impl WorkerRegistry {
    /// Create an empty registry keeping `error_limit` recent errors per worker.
    pub fn new(error_limit: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            capacity_freed: Notify::new(),
            error_limit,
        }
    }

    // A panic while holding the lock cannot leave an entry half-updated, so a
    // poisoned lock is recovered rather than propagated.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a worker, or update its configuration if it already exists.
    ///
    /// Re-registration keeps the performance record, registration order and
    /// any in-flight load. A capacity of zero, or one below the worker's
    /// live load, is rejected.
    pub fn register(&self, id: impl Into<WorkerId>, config: WorkerConfig) -> Result<Worker> {
        self.upsert(id.into(), config, false)
    }

    /// Like [`register`](Self::register) but starts a fresh performance record.
    pub fn register_with_reset(&self, id: impl Into<WorkerId>, config: WorkerConfig) -> Result<Worker> {
        self.upsert(id.into(), config, true)
    }

    fn upsert(&self, id: WorkerId, config: WorkerConfig, reset_history: bool) -> Result<Worker> {
        if config.max_concurrency == 0 {
            return Err(DispatchError::InvalidRequest(format!(
                "worker {} must accept at least one task",
                id
            )));
        }

        let mut state = self.write();

        if let Some(entry) = state.entries.get_mut(&id) {
            let load = entry.worker.current_load;
            if load > config.max_concurrency {
                return Err(DispatchError::InvalidRequest(format!(
                    "worker {} has {} tasks running, cannot lower max concurrency to {}",
                    id, load, config.max_concurrency
                )));
            }

            let mut worker = Worker::from_config(id.clone(), &config, entry.worker.registration_order);
            worker.current_load = load;
            worker.status = entry.worker.status;
            worker.last_used_at = entry.worker.last_used_at;
            entry.worker = worker;
            if reset_history {
                entry.performance = PerformanceRecord::new();
            }

            tracing::debug!("Updated worker {}", id);
            let worker = entry.worker.clone();
            drop(state);
            // a raised limit may unblock waiters
            self.capacity_freed.notify_waiters();
            return Ok(worker);
        }

        let order = state.next_order;
        state.next_order += 1;
        let worker = Worker::from_config(id.clone(), &config, order);
        state.entries.insert(
            id.clone(),
            WorkerEntry {
                worker: worker.clone(),
                performance: PerformanceRecord::new(),
            },
        );

        tracing::info!(
            "Registered worker {} with capabilities {:?}",
            id,
            worker.capabilities
        );
        Ok(worker)
    }

    pub fn get(&self, worker_id: &str) -> Result<Worker> {
        self.read()
            .entries
            .get(worker_id)
            .map(|e| e.worker.clone())
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.read().entries.contains_key(worker_id)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Copy of a worker's performance record.
    pub fn performance(&self, worker_id: &str) -> Result<PerformanceRecord> {
        self.read()
            .entries
            .get(worker_id)
            .map(|e| e.performance.clone())
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))
    }

    /// All workers in registration order.
    pub fn list(&self) -> Vec<Worker> {
        self.read()
            .ordered()
            .into_iter()
            .map(|e| e.worker.clone())
            .collect()
    }

    /// Workers paired with their performance, in registration order.
    pub fn snapshot(&self) -> Vec<(Worker, PerformanceRecord)> {
        self.read()
            .ordered()
            .into_iter()
            .map(|e| (e.worker.clone(), e.performance.clone()))
            .collect()
    }

    /// Workers that could take `task` right now.
    pub fn list_eligible(&self, task: &Task) -> Vec<Worker> {
        self.read()
            .ordered()
            .into_iter()
            .filter(|e| e.worker.is_eligible_for(task))
            .map(|e| e.worker.clone())
            .collect()
    }

    /// Idle workers with spare capacity, regardless of capabilities.
    pub fn list_available(&self) -> Vec<Worker> {
        self.read()
            .ordered()
            .into_iter()
            .filter(|e| e.worker.status == WorkerStatus::Idle && e.worker.has_capacity())
            .map(|e| e.worker.clone())
            .collect()
    }

    /// Workers with spare capacity in any status.
    pub fn list_with_capacity(&self) -> Vec<Worker> {
        self.read()
            .ordered()
            .into_iter()
            .filter(|e| e.worker.has_capacity())
            .map(|e| e.worker.clone())
            .collect()
    }

    /// Rank the currently eligible workers for `task`, best first.
    pub fn rank(&self, task: &Task) -> Vec<ScoredWorker> {
        let state = self.read();
        scoring::rank(
            state
                .entries
                .values()
                .filter(|e| e.worker.is_eligible_for(task))
                .map(|e| (&e.worker, &e.performance)),
            task,
        )
    }

    /// Best eligible worker for `task`, without reserving it.
    pub fn select_best(&self, task: &Task) -> Result<WorkerId> {
        self.rank(task)
            .into_iter()
            .next()
            .map(|s| s.worker_id)
            .ok_or_else(|| DispatchError::NoEligibleWorker(task.id.clone()))
    }

    /// Select the best eligible worker and reserve one of its slots in the
    /// same critical section.
    pub fn select_and_reserve(self: &Arc<Self>, task: &Task) -> Result<Reservation> {
        let mut state = self.write();

        let best = scoring::best(
            state
                .entries
                .values()
                .filter(|e| e.worker.is_eligible_for(task))
                .map(|e| (&e.worker, &e.performance)),
            task,
        )
        .ok_or_else(|| DispatchError::NoEligibleWorker(task.id.clone()))?;

        let entry = state.entry_mut(&best.worker_id)?;
        entry.worker.current_load += 1;

        tracing::debug!(
            "Selected worker {} for task {} (score {:.3})",
            best.worker_id,
            task.id,
            best.score
        );
        Ok(Reservation::new(Arc::clone(self), best.worker_id))
    }

    /// Reserve a slot on a specific worker if it has spare capacity.
    pub fn try_reserve(self: &Arc<Self>, worker_id: &str) -> Result<Option<Reservation>> {
        let mut state = self.write();
        let entry = state.entry_mut(worker_id)?;

        if !entry.worker.has_capacity() {
            return Ok(None);
        }

        entry.worker.current_load += 1;
        Ok(Some(Reservation::new(Arc::clone(self), worker_id.to_string())))
    }

    /// Reserve a slot on a specific worker, waiting until one frees up.
    ///
    /// Returns [`DispatchError::Cancelled`] if `cancel` fires first.
    pub async fn reserve_wait(
        self: &Arc<Self>,
        worker_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Reservation> {
        loop {
            // Register interest before checking so a release between the
            // check and the await is not missed.
            let notified = self.capacity_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reservation) = self.try_reserve(worker_id)? {
                return Ok(reservation);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => {
                    return Err(DispatchError::Cancelled(format!(
                        "waiting for capacity on worker {}",
                        worker_id
                    )));
                }
            }
        }
    }

    /// Mark a reserved worker as executing.
    pub fn mark_running(&self, worker_id: &str) -> Result<()> {
        let mut state = self.write();
        let entry = state.entry_mut(worker_id)?;
        entry.worker.status = WorkerStatus::Busy;
        entry.worker.last_used_at = Some(Utc::now());
        Ok(())
    }

    /// Fold an execution outcome into the worker's performance record.
    pub fn record_outcome(
        &self,
        worker_id: &str,
        success: bool,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        let limit = self.error_limit;
        let mut state = self.write();
        let entry = state.entry_mut(worker_id)?;
        entry.performance.record(success, duration_ms, error, limit);
        Ok(())
    }

    fn release(&self, worker_id: &str) {
        {
            let mut state = self.write();
            match state.entries.get_mut(worker_id) {
                Some(entry) => {
                    entry.worker.current_load = entry.worker.current_load.saturating_sub(1);
                    if entry.worker.current_load == 0 {
                        entry.worker.status = WorkerStatus::Idle;
                    }
                }
                None => {
                    tracing::warn!("Released reservation for unknown worker {}", worker_id);
                }
            }
        }
        self.capacity_freed.notify_waiters();
    }
}

/// A reserved slot on a worker. The slot is released on drop.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<WorkerRegistry>,
    worker_id: WorkerId,
}

impl Reservation {
    fn new(registry: Arc<WorkerRegistry>, worker_id: WorkerId) -> Self {
        Self {
            registry,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Current state of the reserved worker.
    pub fn worker(&self) -> Result<Worker> {
        self.registry.get(&self.worker_id)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry.release(&self.worker_id);
    }
}
