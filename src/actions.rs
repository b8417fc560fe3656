//! JSON action boundary.
//!
//! A request `{ "action": ..., "data": ... }` maps onto one orchestrator
//! operation. Responses are `{ "success": true, "data": ... }` or
//! `{ "success": false, "error": ..., "code": ... }`.

use conclave_dispatch::{
    CollaborationOptions, CollaborationType, DispatchError, Orchestrator, Task, WorkerConfig,
    WorkerId, Workflow,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Every action the boundary understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ExecuteTask,
    ExecuteSequential,
    ExecuteHierarchical,
    ExecuteParallel,
    ExecuteDistributed,
    ExecutePriority,
    ExecuteAdaptive,
    ExecuteIntelligent,
    ExecuteCollaborative,
    ExecuteConsensus,
    RegisterAgent,
    ListAgents,
    GetAgent,
    CreateAgentGroup,
    DisbandGroup,
    ListGroups,
    GetStats,
    GetPoolStats,
    RunPoolTask,
    GetHistory,
    GetInbox,
}

impl Action {
    pub const ALL: [Action; 21] = [
        Action::ExecuteTask,
        Action::ExecuteSequential,
        Action::ExecuteHierarchical,
        Action::ExecuteParallel,
        Action::ExecuteDistributed,
        Action::ExecutePriority,
        Action::ExecuteAdaptive,
        Action::ExecuteIntelligent,
        Action::ExecuteCollaborative,
        Action::ExecuteConsensus,
        Action::RegisterAgent,
        Action::ListAgents,
        Action::GetAgent,
        Action::CreateAgentGroup,
        Action::DisbandGroup,
        Action::ListGroups,
        Action::GetStats,
        Action::GetPoolStats,
        Action::RunPoolTask,
        Action::GetHistory,
        Action::GetInbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ExecuteTask => "execute-task",
            Action::ExecuteSequential => "execute-sequential",
            Action::ExecuteHierarchical => "execute-hierarchical",
            Action::ExecuteParallel => "execute-parallel",
            Action::ExecuteDistributed => "execute-distributed",
            Action::ExecutePriority => "execute-priority",
            Action::ExecuteAdaptive => "execute-adaptive",
            Action::ExecuteIntelligent => "execute-intelligent",
            Action::ExecuteCollaborative => "execute-collaborative",
            Action::ExecuteConsensus => "execute-consensus",
            Action::RegisterAgent => "register-agent",
            Action::ListAgents => "list-agents",
            Action::GetAgent => "get-agent",
            Action::CreateAgentGroup => "create-agent-group",
            Action::DisbandGroup => "disband-group",
            Action::ListGroups => "list-groups",
            Action::GetStats => "get-stats",
            Action::GetPoolStats => "get-pool-stats",
            Action::RunPoolTask => "run-pool-task",
            Action::GetHistory => "get-history",
            Action::GetInbox => "get-inbox",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ActionError::UnknownAction(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid payload for {action}: {source}")]
    InvalidPayload {
        action: Action,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::UnknownAction(_) => "unknown_action",
            ActionError::InvalidPayload { .. } => "invalid_payload",
            ActionError::Dispatch(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(error: &ActionError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskPayload {
    task: Task,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksPayload {
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HierarchicalPayload {
    master_id: WorkerId,
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowPayload {
    workflow: Workflow,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    id: WorkerId,
    #[serde(flatten)]
    config: WorkerConfig,
    #[serde(default)]
    reset_history: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerIdPayload {
    id: WorkerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupPayload {
    #[serde(default)]
    group_id: Option<String>,
    members: Vec<WorkerId>,
    #[serde(default)]
    collaboration_type: CollaborationType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupPayload {
    group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollaborativePayload {
    group_id: String,
    task: Task,
    #[serde(flatten)]
    options: CollaborationOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolStatsPayload {
    #[serde(default)]
    pool: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolTaskPayload {
    pool: String,
    worker_id: WorkerId,
    task: Task,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboxPayload {
    group_id: String,
    worker_id: WorkerId,
    #[serde(default)]
    drain: bool,
}

fn parse<T: DeserializeOwned>(action: Action, data: Value) -> Result<T, ActionError> {
    serde_json::from_value(data).map_err(|source| ActionError::InvalidPayload { action, source })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ActionError> {
    serde_json::to_value(value)
        .map_err(|e| ActionError::Dispatch(DispatchError::Internal(e.into())))
}

/// Executes actions against one orchestrator.
#[derive(Debug, Clone)]
pub struct ActionHandler {
    orchestrator: Arc<Orchestrator>,
}

impl ActionHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Handle a request, folding any error into the response.
    pub async fn handle(&self, request: ActionRequest) -> ApiResponse {
        match self.dispatch(&request.action, request.data).await {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => {
                tracing::warn!("Action {} failed: {}", request.action, e);
                ApiResponse::failure(&e)
            }
        }
    }

    /// Run one action and return its payload.
    pub async fn dispatch(&self, action: &str, data: Value) -> Result<Value, ActionError> {
        let action: Action = action.parse()?;
        let orch = &self.orchestrator;
        let dispatcher = orch.dispatcher();
        tracing::debug!("Handling action {}", action);

        match action {
            Action::ExecuteTask => {
                let TaskPayload { task } = parse(action, data)?;
                to_value(&dispatcher.execute_task(&task).await?)
            }
            Action::ExecuteSequential => {
                let TasksPayload { tasks } = parse(action, data)?;
                to_value(&dispatcher.execute_sequential(&tasks).await?)
            }
            Action::ExecuteHierarchical => {
                let p: HierarchicalPayload = parse(action, data)?;
                to_value(&dispatcher.execute_hierarchical(&p.master_id, &p.tasks).await?)
            }
            Action::ExecuteParallel => {
                let TasksPayload { tasks } = parse(action, data)?;
                to_value(&dispatcher.execute_parallel(&tasks).await?)
            }
            Action::ExecuteDistributed => {
                let TasksPayload { tasks } = parse(action, data)?;
                to_value(&dispatcher.execute_distributed(&tasks).await?)
            }
            Action::ExecutePriority => {
                let TasksPayload { tasks } = parse(action, data)?;
                to_value(&dispatcher.execute_priority(&tasks).await?)
            }
            Action::ExecuteAdaptive => {
                let TasksPayload { tasks } = parse(action, data)?;
                to_value(&dispatcher.execute_adaptive(&tasks).await?)
            }
            Action::ExecuteIntelligent => {
                let WorkflowPayload { workflow } = parse(action, data)?;
                to_value(&dispatcher.execute_intelligent(&workflow).await?)
            }
            Action::ExecuteCollaborative => {
                let p: CollaborativePayload = parse(action, data)?;
                let report = orch
                    .network()
                    .execute_collaborative(&p.group_id, &p.task, p.options)
                    .await?;
                to_value(&report)
            }
            Action::ExecuteConsensus => {
                let p: CollaborativePayload = parse(action, data)?;
                to_value(&orch.network().execute_consensus(&p.group_id, &p.task).await?)
            }
            Action::RegisterAgent => {
                let p: RegisterPayload = parse(action, data)?;
                let worker = if p.reset_history {
                    orch.register_worker_with_reset(&p.id, p.config)?
                } else {
                    orch.register_worker(&p.id, p.config)?
                };
                to_value(&worker)
            }
            Action::ListAgents => to_value(&orch.registry().list()),
            Action::GetAgent => {
                let WorkerIdPayload { id } = parse(action, data)?;
                let worker = orch.registry().get(&id)?;
                let performance = orch.registry().performance(&id)?;
                Ok(json!({
                    "worker": to_value(&worker)?,
                    "performance": to_value(&performance)?,
                    "successRate": performance.success_rate(),
                }))
            }
            Action::CreateAgentGroup => {
                let p: CreateGroupPayload = parse(action, data)?;
                let group_id = p
                    .group_id
                    .unwrap_or_else(|| format!("group-{}", uuid::Uuid::new_v4()));
                let group = orch
                    .network()
                    .create_group(group_id, &p.members, p.collaboration_type)?;
                to_value(&group)
            }
            Action::DisbandGroup => {
                let GroupPayload { group_id } = parse(action, data)?;
                to_value(&orch.network().disband_group(&group_id)?)
            }
            Action::ListGroups => to_value(&orch.network().list_groups()),
            Action::GetStats => Ok(json!({
                "system": to_value(&orch.stats())?,
                "groups": orch.network().list_groups().len(),
                "pools": orch.pools().names(),
            })),
            Action::GetPoolStats => {
                let p: PoolStatsPayload = if data.is_null() {
                    PoolStatsPayload::default()
                } else {
                    parse(action, data)?
                };
                match p.pool {
                    Some(name) => to_value(&orch.pools().get(&name)?.stats()),
                    None => to_value(&orch.pool_stats()),
                }
            }
            Action::RunPoolTask => {
                let p: PoolTaskPayload = parse(action, data)?;
                let pool = orch.pools().get(&p.pool)?;
                to_value(&pool.run_task(&p.worker_id, &p.task).await?)
            }
            Action::GetHistory => {
                let p: HistoryPayload = if data.is_null() {
                    HistoryPayload::default()
                } else {
                    parse(action, data)?
                };
                // the log is already capped at the configured history limit
                to_value(&orch.recent_results(p.limit.unwrap_or(usize::MAX)))
            }
            Action::GetInbox => {
                let p: InboxPayload = parse(action, data)?;
                let messages = if p.drain {
                    orch.network().take_inbox(&p.group_id, &p.worker_id)?
                } else {
                    orch.network().inbox(&p.group_id, &p.worker_id)?
                };
                to_value(&messages)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!(matches!(
            "explode".parse::<Action>(),
            Err(ActionError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_failure_response_shape() {
        let err = ActionError::Dispatch(DispatchError::UnknownMaster("boss".into()));
        let body = serde_json::to_value(ApiResponse::failure(&err)).unwrap();

        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Master worker not found: boss");
        assert_eq!(body["code"], "unknown_master");
        assert!(body.get("data").is_none());
    }
}
