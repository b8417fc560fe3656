//! Rule-based task decomposition.

use crate::task::Task;
use crate::types::{SubtaskId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

const ANALYSIS_STAGES: [&str; 3] = ["data-collection", "data-analysis", "result-synthesis"];
const GENERATION_STAGES: [&str; 3] = ["research", "content-creation", "quality-review"];
const DEFAULT_STAGES: [&str; 3] = ["preprocessing", "main-processing", "postprocessing"];

/// Ordered subtask archetypes for a task type.
pub fn archetypes(task_type: &str) -> &'static [&'static str] {
    match task_type {
        "analysis" => &ANALYSIS_STAGES,
        "generation" => &GENERATION_STAGES,
        _ => &DEFAULT_STAGES,
    }
}

/// Capabilities a subtask archetype requires.
pub fn archetype_capabilities(subtask_type: &str) -> &'static [&'static str] {
    match subtask_type {
        "data-collection" => &["research", "data-processing"],
        "data-analysis" => &["analysis"],
        "result-synthesis" => &["coordination"],
        "research" => &["research"],
        "content-creation" => &["content-creation"],
        "quality-review" => &["quality-assurance"],
        "preprocessing" => &["data-processing"],
        "postprocessing" => &["quality-assurance"],
        _ => &[],
    }
}

/// A slice of a parent task, assigned to one group member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: SubtaskId,
    #[serde(rename = "type")]
    pub subtask_type: String,
    pub description: String,
    /// 1-based position in the archetype sequence
    pub priority: u32,
    pub estimated_time_ms: u64,
    pub required_capabilities: BTreeSet<String>,
    pub parent_task_id: TaskId,
    /// Predecessor in a pipeline chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<SubtaskId>,
    #[serde(default)]
    pub data: Value,
}

impl Subtask {
    /// The task handed to the dispatcher for this subtask.
    pub fn to_task(&self) -> Task {
        Task::new(self.subtask_type.clone(), self.description.clone())
            .with_id(self.id.clone())
            .with_capabilities(self.required_capabilities.iter().cloned())
            .with_priority(self.priority as i32)
            .with_estimate_ms(self.estimated_time_ms)
            .with_data(self.data.clone())
    }
}

/// Split `task` into its archetype subtasks.
///
/// The parent estimate (or `default_estimate_ms` when it has none) is
/// divided evenly across the subtasks.
pub fn decompose(task: &Task, default_estimate_ms: u64) -> Vec<Subtask> {
    let stages = archetypes(&task.task_type);
    let total = task.estimated_time_ms.unwrap_or(default_estimate_ms);
    let share = total / stages.len() as u64;

    stages
        .iter()
        .enumerate()
        .map(|(i, stage)| Subtask {
            id: format!("{}-{}", task.id, stage),
            subtask_type: stage.to_string(),
            description: format!("{} for: {}", stage, task.description),
            priority: i as u32 + 1,
            estimated_time_ms: share,
            required_capabilities: archetype_capabilities(stage)
                .iter()
                .map(|c| c.to_string())
                .collect(),
            parent_task_id: task.id.clone(),
            depends_on: None,
            data: task.data.clone(),
        })
        .collect()
}
