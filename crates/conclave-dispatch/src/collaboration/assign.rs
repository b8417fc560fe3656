//! Subtask-to-member assignment.

use super::decompose::Subtask;
use crate::performance::PerformanceRecord;
use crate::registry::Worker;
use crate::scoring;
use crate::types::{DispatchError, Result, WorkerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Best-scoring member per subtask, independently
    DivideAndConquer,
    /// Members in rotation along a linear dependency chain
    Pipeline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub subtask: Subtask,
    pub worker_id: WorkerId,
    /// Member score for the subtask (divide-and-conquer only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Assign `subtasks` to `members`.
///
/// Divide-and-conquer may give several subtasks to the same member; capacity
/// is enforced when the assignments run, not here.
pub fn assign(
    subtasks: Vec<Subtask>,
    members: &[(Worker, PerformanceRecord)],
    strategy: AssignmentStrategy,
) -> Result<Vec<Assignment>> {
    if members.is_empty() {
        return Err(DispatchError::NoAvailableWorkers("group assignment".to_string()));
    }

    let assignments = match strategy {
        AssignmentStrategy::DivideAndConquer => subtasks
            .into_iter()
            .map(|subtask| {
                let task = subtask.to_task();
                let best = scoring::best(members.iter().map(|(w, p)| (w, p)), &task)
                    .ok_or_else(|| DispatchError::NoEligibleWorker(subtask.id.clone()))?;
                Ok(Assignment {
                    subtask,
                    worker_id: best.worker_id,
                    score: Some(best.score),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        AssignmentStrategy::Pipeline => {
            let mut ordered = subtasks;
            ordered.sort_by_key(|s| s.priority);

            let mut previous: Option<String> = None;
            ordered
                .into_iter()
                .enumerate()
                .map(|(i, mut subtask)| {
                    subtask.depends_on = previous.replace(subtask.id.clone());
                    Assignment {
                        subtask,
                        worker_id: members[i % members.len()].0.id.clone(),
                        score: None,
                    }
                })
                .collect()
        }
    };

    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaboration::decompose::decompose;
    use crate::registry::WorkerConfig;
    use crate::task::Task;

    fn member(id: &str, caps: &[&str], order: u64) -> (Worker, PerformanceRecord) {
        let config = WorkerConfig::new(id).with_capabilities(caps.iter().copied());
        (
            Worker::from_config(id.to_string(), &config, order),
            PerformanceRecord::new(),
        )
    }

    #[test]
    fn test_divide_and_conquer_matches_capabilities() {
        let members = vec![
            member("collector", &["research", "data-processing"], 0),
            member("analyst", &["analysis"], 1),
            member("lead", &["coordination"], 2),
        ];
        let subtasks = decompose(&Task::new("analysis", ""), 3000);

        let assignments = assign(subtasks, &members, AssignmentStrategy::DivideAndConquer).unwrap();
        let workers: Vec<&str> = assignments.iter().map(|a| a.worker_id.as_str()).collect();
        assert_eq!(workers, vec!["collector", "analyst", "lead"]);
        assert!(assignments.iter().all(|a| a.score.is_some()));
    }

    #[test]
    fn test_divide_and_conquer_may_collide() {
        let members = vec![member("generalist", &["analysis"], 0), member("idle", &[], 1)];
        let subtasks = decompose(&Task::new("analysis", ""), 3000);

        let assignments = assign(subtasks, &members, AssignmentStrategy::DivideAndConquer).unwrap();
        assert_eq!(assignments[1].worker_id, "generalist");
    }

    #[test]
    fn test_pipeline_chains_dependencies() {
        let members = vec![member("a", &[], 0), member("b", &[], 1)];
        let mut subtasks = decompose(&Task::new("generation", "").with_id("g"), 3000);
        subtasks.reverse();

        let assignments = assign(subtasks, &members, AssignmentStrategy::Pipeline).unwrap();

        let kinds: Vec<&str> = assignments.iter().map(|a| a.subtask.subtask_type.as_str()).collect();
        assert_eq!(kinds, vec!["research", "content-creation", "quality-review"]);

        let workers: Vec<&str> = assignments.iter().map(|a| a.worker_id.as_str()).collect();
        assert_eq!(workers, vec!["a", "b", "a"]);

        assert_eq!(assignments[0].subtask.depends_on, None);
        assert_eq!(assignments[1].subtask.depends_on.as_deref(), Some("g-research"));
        assert_eq!(assignments[2].subtask.depends_on.as_deref(), Some("g-content-creation"));
    }

    #[test]
    fn test_no_members() {
        let err = assign(Vec::new(), &[], AssignmentStrategy::Pipeline).unwrap_err();
        assert!(matches!(err, DispatchError::NoAvailableWorkers(_)));
    }
}
