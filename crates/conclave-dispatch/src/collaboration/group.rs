//! Worker groups, pairwise connections and group messaging.

use crate::task::TaskResult;
use crate::types::{GroupId, SubtaskId, WorkerId};
use chrono::{DateTime, Utc};
use conclave_config::CollaborationConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// How members of a group relate to each other.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationType {
    /// Members split the work between them
    #[default]
    Cooperative,
    /// Work flows down a fixed chain of members
    Hierarchical,
    /// Every member attempts the whole task
    Competitive,
}

/// A fixed set of workers collaborating with shared context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerGroup {
    pub id: GroupId,
    /// Unique member ids in the order they were given
    pub members: Vec<WorkerId>,
    pub collaboration_type: CollaborationType,
    /// Last result per subtask type
    pub shared_context: BTreeMap<String, TaskResult>,
    /// Last successful output per subtask type
    pub shared_resources: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl WorkerGroup {
    pub fn is_member(&self, worker_id: &str) -> bool {
        self.members.iter().any(|m| m == worker_id)
    }
}

/// One unit of work observed on a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationEvent {
    pub worker_id: WorkerId,
    pub subtask_id: SubtaskId,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Collaboration record between two members of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub member_a: WorkerId,
    pub member_b: WorkerId,
    pub group_id: GroupId,
    pub strength: f64,
    /// Always within [0, 1]
    pub trust_level: f64,
    /// Most recent events, oldest first
    pub history: VecDeque<CommunicationEvent>,
}

impl Connection {
    pub(crate) fn new(group_id: &str, a: &str, b: &str, config: &CollaborationConfig) -> Self {
        Self {
            member_a: a.to_string(),
            member_b: b.to_string(),
            group_id: group_id.to_string(),
            strength: config.initial_strength,
            trust_level: config.initial_trust,
            history: VecDeque::new(),
        }
    }

    pub fn touches(&self, worker_id: &str) -> bool {
        self.member_a == worker_id || self.member_b == worker_id
    }

    pub fn joins(&self, a: &str, b: &str) -> bool {
        (self.member_a == a && self.member_b == b) || (self.member_a == b && self.member_b == a)
    }

    /// Strengthen the connection; successful events also build trust.
    pub(crate) fn reinforce(&mut self, event: CommunicationEvent, config: &CollaborationConfig) {
        self.strength = (self.strength + config.strength_step).min(config.strength_ceiling);
        if event.success {
            self.trust_level = (self.trust_level + config.trust_step).min(config.trust_ceiling);
        }

        self.history.push_back(event);
        while self.history.len() > config.connection_history_limit {
            self.history.pop_front();
        }
    }
}

/// A result broadcast from one member to the rest of its group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub from: WorkerId,
    pub subtask_type: String,
    pub result: TaskResult,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of one group, guarded as a unit.
#[derive(Debug)]
pub(crate) struct GroupEntry {
    pub(crate) group: WorkerGroup,
    pub(crate) connections: Vec<Connection>,
    pub(crate) inboxes: HashMap<WorkerId, VecDeque<GroupMessage>>,
}

impl GroupEntry {
    pub(crate) fn new(
        id: GroupId,
        members: Vec<WorkerId>,
        collaboration_type: CollaborationType,
        config: &CollaborationConfig,
    ) -> Self {
        let mut connections = Vec::with_capacity(members.len() * members.len().saturating_sub(1) / 2);
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                connections.push(Connection::new(&id, a, b, config));
            }
        }

        let inboxes = members.iter().map(|m| (m.clone(), VecDeque::new())).collect();

        Self {
            group: WorkerGroup {
                id,
                members,
                collaboration_type,
                shared_context: BTreeMap::new(),
                shared_resources: BTreeMap::new(),
                created_at: Utc::now(),
            },
            connections,
            inboxes,
        }
    }

    /// Apply one result: shared state, broadcast, and connection updates.
    pub(crate) fn record(
        &mut self,
        worker_id: &str,
        subtask_id: &str,
        subtask_type: &str,
        result: &TaskResult,
        config: &CollaborationConfig,
    ) {
        self.group
            .shared_context
            .insert(subtask_type.to_string(), result.clone());
        if let Some(output) = result.output.as_ref().filter(|_| result.success) {
            self.group
                .shared_resources
                .insert(subtask_type.to_string(), output.clone());
        }

        let now = Utc::now();
        for member in &self.group.members {
            if member == worker_id {
                continue;
            }
            if let Some(inbox) = self.inboxes.get_mut(member) {
                inbox.push_back(GroupMessage {
                    from: worker_id.to_string(),
                    subtask_type: subtask_type.to_string(),
                    result: result.clone(),
                    timestamp: now,
                });
                while inbox.len() > config.inbox_limit {
                    inbox.pop_front();
                }
            }
        }

        for connection in self.connections.iter_mut().filter(|c| c.touches(worker_id)) {
            connection.reinforce(
                CommunicationEvent {
                    worker_id: worker_id.to_string(),
                    subtask_id: subtask_id.to_string(),
                    success: result.success,
                    timestamp: now,
                },
                config,
            );
        }
    }

    /// Outputs recorded so far, keyed by subtask type.
    pub(crate) fn context_outputs(&self) -> serde_json::Map<String, Value> {
        self.group
            .shared_context
            .iter()
            .filter_map(|(kind, result)| result.output.clone().map(|o| (kind.clone(), o)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use serde_json::json;

    fn entry(members: &[&str]) -> GroupEntry {
        GroupEntry::new(
            "g".to_string(),
            members.iter().map(|m| m.to_string()).collect(),
            CollaborationType::Cooperative,
            &CollaborationConfig::default(),
        )
    }

    fn strength(entry: &GroupEntry, a: &str, b: &str) -> f64 {
        entry
            .connections
            .iter()
            .find(|c| c.joins(a, b))
            .map(|c| c.strength)
            .unwrap()
    }

    #[test]
    fn test_pairwise_connections() {
        assert_eq!(entry(&["a", "b", "c"]).connections.len(), 3);
        assert_eq!(entry(&["a", "b", "c", "d"]).connections.len(), 6);
        assert!(entry(&["solo"]).connections.is_empty());
    }

    #[test]
    fn test_record_reinforces_touching_connections() {
        let config = CollaborationConfig::default();
        let mut entry = entry(&["m1", "m2", "m3"]);
        let task = Task::new("research", "");
        let result = TaskResult::succeeded(&task, "m1", json!("notes"), 10);

        entry.record("m1", "s1", "research", &result, &config);

        assert!((strength(&entry, "m1", "m2") - 1.1).abs() < 1e-9);
        assert!((strength(&entry, "m1", "m3") - 1.1).abs() < 1e-9);
        assert_eq!(strength(&entry, "m2", "m3"), 1.0);

        let trust = entry.connections.iter().find(|c| c.joins("m1", "m2")).unwrap().trust_level;
        assert!((trust - 0.85).abs() < 1e-9);

        assert_eq!(entry.inboxes["m2"].len(), 1);
        assert_eq!(entry.inboxes["m3"].len(), 1);
        assert!(entry.inboxes["m1"].is_empty());
        assert_eq!(entry.group.shared_resources["research"], json!("notes"));
    }

    #[test]
    fn test_failures_strengthen_without_trust() {
        let config = CollaborationConfig::default();
        let mut entry = entry(&["m1", "m2"]);
        let task = Task::new("t", "");
        let failed = TaskResult::failed(
            &task,
            "m1",
            crate::task::TaskError::new(crate::task::TaskErrorKind::ExecutorFailure, "x"),
            1,
        );

        entry.record("m1", "s1", "t", &failed, &config);
        let conn = &entry.connections[0];
        assert!((conn.strength - 1.1).abs() < 1e-9);
        assert_eq!(conn.trust_level, 0.8);
        assert!(!entry.group.shared_resources.contains_key("t"));
        assert!(entry.group.shared_context.contains_key("t"));
    }

    #[test]
    fn test_ceilings_hold() {
        let config = CollaborationConfig::default();
        let mut entry = entry(&["m1", "m2"]);
        let task = Task::new("t", "");
        let ok = TaskResult::succeeded(&task, "m1", json!(1), 1);

        for _ in 0..50 {
            entry.record("m1", "s", "t", &ok, &config);
        }

        let conn = &entry.connections[0];
        assert_eq!(conn.strength, 2.0);
        assert_eq!(conn.trust_level, 1.0);
        assert_eq!(conn.history.len(), 50);
    }
}
