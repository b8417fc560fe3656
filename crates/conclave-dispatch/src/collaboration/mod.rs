//! Group-based collaborative execution.
//!
//! A [`CollaborationNetwork`] owns worker groups and runs tasks across them,
//! either by decomposing a task into subtasks spread over the members or by
//! letting every member attempt it and taking the consensus.

pub mod assign;
pub mod consensus;
pub mod decompose;
pub mod group;
pub mod merge;

pub use assign::{assign, Assignment, AssignmentStrategy};
pub use consensus::{find_consensus, ConsensusResult};
pub use decompose::{decompose, Subtask};
pub use group::{CollaborationType, CommunicationEvent, Connection, GroupMessage, WorkerGroup};
pub use merge::{merge, MergedResult};

use crate::dispatcher::Dispatcher;
use crate::performance::PerformanceRecord;
use crate::registry::Worker;
use crate::task::{Task, TaskResult};
use crate::types::{DispatchError, GroupId, Result, WorkerId};
use conclave_config::CollaborationConfig;
use futures::future::join_all;
use group::GroupEntry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// How coordinated subtasks are scheduled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// One at a time by ascending priority, each seeing earlier results
    Sync,
    /// All at once, merged afterwards
    Async,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStrategy {
    DivideAndConquer,
    Pipeline,
    Consensus,
}

impl CollaborationStrategy {
    pub fn assignment(&self) -> Option<AssignmentStrategy> {
        match self {
            CollaborationStrategy::DivideAndConquer => Some(AssignmentStrategy::DivideAndConquer),
            CollaborationStrategy::Pipeline => Some(AssignmentStrategy::Pipeline),
            CollaborationStrategy::Consensus => None,
        }
    }
}

impl CollaborationType {
    /// Strategy and scheduling used when the caller does not choose.
    pub fn defaults(&self) -> (CollaborationStrategy, SyncMode) {
        match self {
            CollaborationType::Cooperative => (CollaborationStrategy::DivideAndConquer, SyncMode::Async),
            CollaborationType::Hierarchical => (CollaborationStrategy::Pipeline, SyncMode::Sync),
            CollaborationType::Competitive => (CollaborationStrategy::Consensus, SyncMode::Async),
        }
    }
}

/// Caller overrides for a collaborative run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationOptions {
    #[serde(default)]
    pub strategy: Option<CollaborationStrategy>,
    #[serde(default)]
    pub sync_mode: Option<SyncMode>,
}

/// Outcome of a collaborative run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollaborativeReport {
    pub group_id: GroupId,
    pub task_id: String,
    pub strategy: CollaborationStrategy,
    pub sync_mode: SyncMode,
    pub assignments: Vec<Assignment>,
    pub results: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
    /// Sum of durations in sync mode, makespan otherwise
    pub total_duration_ms: u64,
}

type GroupHandle = Arc<Mutex<GroupEntry>>;

/// Owns worker groups and runs collaborative tasks over them.
#[derive(Debug)]
pub struct CollaborationNetwork {
    dispatcher: Dispatcher,
    config: CollaborationConfig,
    groups: RwLock<HashMap<GroupId, GroupHandle>>,
}

impl CollaborationNetwork {
    pub fn new(dispatcher: Dispatcher, config: CollaborationConfig) -> Self {
        Self {
            dispatcher,
            config,
            groups: RwLock::new(HashMap::new()),
        }
    }

    fn handle(&self, group_id: &str) -> Result<GroupHandle> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_id)
            .cloned()
            .ok_or_else(|| DispatchError::group_not_found(group_id))
    }

    fn lock(handle: &GroupHandle) -> MutexGuard<'_, GroupEntry> {
        handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Form a group from registered workers.
    ///
    /// Unknown ids are dropped with a warning and duplicates collapse to
    /// their first occurrence. A group with no valid members is rejected.
    pub fn create_group(
        &self,
        group_id: impl Into<GroupId>,
        member_ids: &[WorkerId],
        collaboration_type: CollaborationType,
    ) -> Result<WorkerGroup> {
        let group_id = group_id.into();
        let registry = &self.dispatcher.state().registry;

        let mut seen: HashSet<String> = HashSet::new();
        let members: Vec<WorkerId> = member_ids
            .iter()
            .filter(|id| {
                let known = registry.contains(id);
                if !known {
                    tracing::warn!("Dropping unknown worker {} from group {}", id, group_id);
                }
                known
            })
            .filter(|id| seen.insert(id.as_str().to_string()))
            .cloned()
            .collect();

        if members.is_empty() {
            return Err(DispatchError::NoAvailableWorkers(format!(
                "group {} has no registered members",
                group_id
            )));
        }

        let entry = GroupEntry::new(group_id.clone(), members, collaboration_type, &self.config);
        let group = entry.group.clone();

        let replaced = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group_id.clone(), Arc::new(Mutex::new(entry)))
            .is_some();
        if replaced {
            tracing::warn!("Group {} replaced", group_id);
        }

        tracing::info!(
            "Created {:?} group {} with {} members",
            collaboration_type,
            group_id,
            group.members.len()
        );
        Ok(group)
    }

    /// Remove a group and its connections.
    pub fn disband_group(&self, group_id: &str) -> Result<WorkerGroup> {
        let handle = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group_id)
            .ok_or_else(|| DispatchError::group_not_found(group_id))?;

        tracing::info!("Disbanded group {}", group_id);
        let group = Self::lock(&handle).group.clone();
        Ok(group)
    }

    pub fn group(&self, group_id: &str) -> Result<WorkerGroup> {
        let handle = self.handle(group_id)?;
        let group = Self::lock(&handle).group.clone();
        Ok(group)
    }

    pub fn list_groups(&self) -> Vec<WorkerGroup> {
        let handles: Vec<GroupHandle> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut groups: Vec<WorkerGroup> = handles.iter().map(|h| Self::lock(h).group.clone()).collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        groups
    }

    pub fn connections(&self, group_id: &str) -> Result<Vec<Connection>> {
        let handle = self.handle(group_id)?;
        let connections = Self::lock(&handle).connections.clone();
        Ok(connections)
    }

    /// The connection between two members, in either order.
    pub fn connection(&self, group_id: &str, a: &str, b: &str) -> Result<Option<Connection>> {
        Ok(self.connections(group_id)?.into_iter().find(|c| c.joins(a, b)))
    }

    /// Messages waiting for `worker_id` in a group.
    pub fn inbox(&self, group_id: &str, worker_id: &str) -> Result<Vec<GroupMessage>> {
        let handle = self.handle(group_id)?;
        let entry = Self::lock(&handle);
        entry
            .inboxes
            .get(worker_id)
            .map(|inbox| inbox.iter().cloned().collect())
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))
    }

    /// Take and clear the messages waiting for `worker_id`.
    pub fn take_inbox(&self, group_id: &str, worker_id: &str) -> Result<Vec<GroupMessage>> {
        let handle = self.handle(group_id)?;
        let mut entry = Self::lock(&handle);
        entry
            .inboxes
            .get_mut(worker_id)
            .map(|inbox| inbox.drain(..).collect())
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))
    }

    /// Split a task into subtasks.
    pub fn decompose(&self, task: &Task) -> Vec<Subtask> {
        decompose(task, self.config.default_estimate_ms)
    }

    fn members(&self, group: &WorkerGroup) -> Vec<(Worker, PerformanceRecord)> {
        let mut snapshot: HashMap<WorkerId, (Worker, PerformanceRecord)> = self
            .dispatcher
            .state()
            .registry
            .snapshot()
            .into_iter()
            .map(|(w, p)| (w.id.clone(), (w, p)))
            .collect();

        group
            .members
            .iter()
            .filter_map(|id| snapshot.remove(id))
            .collect()
    }

    /// Assign subtasks to the members of a group.
    pub fn assign(
        &self,
        group_id: &str,
        subtasks: Vec<Subtask>,
        strategy: AssignmentStrategy,
    ) -> Result<Vec<Assignment>> {
        let group = self.group(group_id)?;
        assign(subtasks, &self.members(&group), strategy)
    }

    fn record(&self, handle: &GroupHandle, worker_id: &str, task: &Task, result: &TaskResult) {
        Self::lock(handle).record(worker_id, &task.id, &task.task_type, result, &self.config);
    }

    /// Run assignments on their members and feed every result back into the
    /// group's shared state and connections.
    ///
    /// Results are returned in execution order for `Sync`, assignment order
    /// for `Async`.
    pub async fn execute_with_coordination(
        &self,
        group_id: &str,
        assignments: &[Assignment],
        sync_mode: SyncMode,
    ) -> Result<Vec<TaskResult>> {
        let handle = self.handle(group_id)?;

        match sync_mode {
            SyncMode::Sync => {
                let mut ordered: Vec<&Assignment> = assignments.iter().collect();
                ordered.sort_by_key(|a| a.subtask.priority);

                let mut results = Vec::with_capacity(ordered.len());
                for assignment in ordered {
                    let context = Value::Object(Self::lock(&handle).context_outputs());
                    let task = with_shared_context(assignment.subtask.to_task(), context);

                    let result = self.dispatcher.execute_on(&assignment.worker_id, &task).await?;
                    self.record(&handle, &assignment.worker_id, &task, &result);
                    results.push(result);
                }
                Ok(results)
            }
            SyncMode::Async => {
                let runs = assignments.iter().map(|assignment| {
                    let handle = &handle;
                    async move {
                        let task = assignment.subtask.to_task();
                        let result = self.dispatcher.execute_on(&assignment.worker_id, &task).await?;
                        self.record(handle, &assignment.worker_id, &task, &result);
                        Ok::<_, DispatchError>(result)
                    }
                });
                join_all(runs).await.into_iter().collect()
            }
        }
    }

    /// Every member attempts `task`; the most common output wins.
    pub async fn execute_consensus(&self, group_id: &str, task: &Task) -> Result<ConsensusResult> {
        let handle = self.handle(group_id)?;
        let members = Self::lock(&handle).group.members.clone();

        tracing::info!("Consensus run of task {} across {} members", task.id, members.len());

        let runs = members.iter().map(|member| {
            let handle = &handle;
            async move {
                // each attempt is tracked separately
                let attempt = task.clone().with_id(format!("{}-{}", task.id, member));
                let result = self.dispatcher.execute_on(member, &attempt).await?;
                self.record(handle, member, &attempt, &result);
                Ok::<_, DispatchError>(result)
            }
        });

        let results = join_all(runs).await.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(find_consensus(&task.id, results))
    }

    /// Run `task` across a group using the group type's defaults unless
    /// overridden.
    pub async fn execute_collaborative(
        &self,
        group_id: &str,
        task: &Task,
        options: CollaborationOptions,
    ) -> Result<CollaborativeReport> {
        let group = self.group(group_id)?;
        let (default_strategy, default_mode) = group.collaboration_type.defaults();
        let strategy = options.strategy.unwrap_or(default_strategy);
        let sync_mode = options.sync_mode.unwrap_or(default_mode);

        tracing::info!(
            "Collaborative run of task {} in group {} ({:?}, {:?})",
            task.id,
            group_id,
            strategy,
            sync_mode
        );

        let Some(assignment_strategy) = strategy.assignment() else {
            let consensus = self.execute_consensus(group_id, task).await?;
            let total_duration_ms = consensus.results.iter().map(|r| r.duration_ms).max().unwrap_or(0);
            return Ok(CollaborativeReport {
                group_id: group_id.to_string(),
                task_id: task.id.clone(),
                strategy,
                sync_mode: SyncMode::Async,
                assignments: Vec::new(),
                results: consensus.results.clone(),
                merged: None,
                consensus: Some(consensus),
                total_duration_ms,
            });
        };

        let subtasks = self.decompose(task);
        let assignments = assign(subtasks, &self.members(&group), assignment_strategy)?;
        let results = self
            .execute_with_coordination(group_id, &assignments, sync_mode)
            .await?;
        let merged = merge(&results, task)?;

        let total_duration_ms = match sync_mode {
            SyncMode::Sync => results.iter().map(|r| r.duration_ms).sum(),
            SyncMode::Async => results.iter().map(|r| r.duration_ms).max().unwrap_or(0),
        };

        Ok(CollaborativeReport {
            group_id: group_id.to_string(),
            task_id: task.id.clone(),
            strategy,
            sync_mode,
            assignments,
            results,
            merged: Some(merged),
            consensus: None,
            total_duration_ms,
        })
    }
}

/// Expose earlier subtask outputs to the next subtask under `sharedContext`.
fn with_shared_context(mut task: Task, context: Value) -> Task {
    task.data = match task.data {
        Value::Object(mut fields) => {
            fields.insert("sharedContext".to_string(), context);
            Value::Object(fields)
        }
        Value::Null => json!({ "sharedContext": context }),
        other => json!({ "input": other, "sharedContext": context }),
    };
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerConfig;
    use crate::state::OrchestratorState;
    use crate::testing::ScriptedExecutor;
    use tokio_util::sync::CancellationToken;

    fn network(executor: ScriptedExecutor) -> (CollaborationNetwork, Arc<ScriptedExecutor>) {
        let executor = Arc::new(executor);
        let dispatcher = Dispatcher::new(
            Arc::new(OrchestratorState::default()),
            executor.clone(),
            CancellationToken::new(),
        );
        let registry = &dispatcher.state().registry;
        registry.register(
            "collector",
            WorkerConfig::new("Collector").with_capabilities(["research", "data-processing"]),
        ).unwrap();
        registry.register("analyst", WorkerConfig::new("Analyst").with_capabilities(["analysis"])).unwrap();
        registry.register("lead", WorkerConfig::new("Lead").with_capabilities(["coordination"])).unwrap();

        (
            CollaborationNetwork::new(dispatcher, CollaborationConfig::default()),
            executor,
        )
    }

    fn ids(ids: &[&str]) -> Vec<WorkerId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_group_drops_unknown_and_duplicates() {
        let (network, _) = network(ScriptedExecutor::new());
        let group = network
            .create_group(
                "g",
                &ids(&["analyst", "ghost", "lead", "analyst"]),
                CollaborationType::Cooperative,
            )
            .unwrap();

        assert_eq!(group.members, ids(&["analyst", "lead"]));
        assert_eq!(network.connections("g").unwrap().len(), 1);
    }

    #[test]
    fn test_create_group_rejects_empty() {
        let (network, _) = network(ScriptedExecutor::new());
        let err = network
            .create_group("g", &ids(&["ghost"]), CollaborationType::Cooperative)
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoAvailableWorkers(_)));
    }

    #[test]
    fn test_disband() {
        let (network, _) = network(ScriptedExecutor::new());
        network
            .create_group("g", &ids(&["analyst", "lead"]), CollaborationType::Cooperative)
            .unwrap();

        network.disband_group("g").unwrap();
        assert!(matches!(
            network.group("g"),
            Err(DispatchError::NotFound { .. })
        ));
        assert!(network.disband_group("g").is_err());
    }

    #[tokio::test]
    async fn test_cooperative_run_merges_subtasks() {
        let (network, _) = network(ScriptedExecutor::new());
        network
            .create_group(
                "g",
                &ids(&["collector", "analyst", "lead"]),
                CollaborationType::Cooperative,
            )
            .unwrap();

        let task = Task::new("analysis", "churn drivers");
        let report = network
            .execute_collaborative("g", &task, CollaborationOptions::default())
            .await
            .unwrap();

        assert_eq!(report.strategy, CollaborationStrategy::DivideAndConquer);
        assert_eq!(report.sync_mode, SyncMode::Async);
        assert_eq!(report.results.len(), 3);

        let merged = report.merged.unwrap();
        assert_eq!(merged.successful, 3);
        assert_eq!(merged.contributors, ids(&["collector", "analyst", "lead"]));

        let group = network.group("g").unwrap();
        assert_eq!(group.shared_context.len(), 3);
        assert_eq!(network.inbox("g", "lead").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_mode_passes_context_forward() {
        let executor = ScriptedExecutor::new()
            .with_worker_output("collector", json!({"content": "Findings", "quality": 0.9}))
            .with_worker_output("analyst", json!({"content": "Draft", "quality": 0.6}));
        let (network, executor) = network(executor);
        network
            .create_group(
                "g",
                &ids(&["collector", "analyst"]),
                CollaborationType::Hierarchical,
            )
            .unwrap();

        let task = Task::new("generation", "release notes");
        let report = network
            .execute_collaborative("g", &task, CollaborationOptions::default())
            .await
            .unwrap();

        assert_eq!(report.strategy, CollaborationStrategy::Pipeline);
        let order: Vec<String> = executor.calls().into_iter().map(|(w, _)| w).collect();
        assert_eq!(order, ids(&["collector", "analyst", "collector"]));

        let kinds: Vec<&str> = report.results.iter().map(|r| r.task_type.as_str()).collect();
        assert_eq!(kinds, vec!["research", "content-creation", "quality-review"]);

        let merged = report.merged.unwrap();
        assert_eq!(merged.output["content"], "Findings\n\nDraft\n\nFindings");
        assert_eq!(merged.output["sections"], 3);
        let quality = merged.output["averageQuality"].as_f64().unwrap();
        assert!((quality - 0.8).abs() < 1e-9);
        assert_eq!(merged.confidence, 1.0);

        let shared = network.group("g").unwrap().shared_resources;
        assert_eq!(shared["research"]["content"], "Findings");
        assert_eq!(shared["content-creation"]["content"], "Draft");
    }

    #[tokio::test]
    async fn test_competitive_runs_consensus() {
        let executor = ScriptedExecutor::new()
            .with_worker_output("collector", json!("A"))
            .with_worker_output("analyst", json!("A"))
            .with_failing_worker("lead");
        let (network, _) = network(executor);
        network
            .create_group(
                "g",
                &ids(&["collector", "analyst", "lead"]),
                CollaborationType::Competitive,
            )
            .unwrap();

        let report = network
            .execute_collaborative("g", &Task::new("review", ""), CollaborationOptions::default())
            .await
            .unwrap();

        let consensus = report.consensus.unwrap();
        assert_eq!(consensus.output, Some(json!("A")));
        assert!((consensus.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(consensus.contributors, ids(&["collector", "analyst"]));
    }

    #[tokio::test]
    async fn test_all_subtasks_failing_is_an_error() {
        let executor = ScriptedExecutor::new()
            .with_failing_worker("collector")
            .with_failing_worker("analyst")
            .with_failing_worker("lead");
        let (network, _) = network(executor);
        network
            .create_group(
                "g",
                &ids(&["collector", "analyst", "lead"]),
                CollaborationType::Cooperative,
            )
            .unwrap();

        let err = network
            .execute_collaborative("g", &Task::new("analysis", ""), CollaborationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoSuccessfulSubtasks(_)));
    }
}
