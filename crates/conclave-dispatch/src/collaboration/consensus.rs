//! Majority agreement over independent attempts at the same task.

use crate::task::TaskResult;
use crate::types::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub task_id: TaskId,
    /// False when no attempt succeeded
    pub consensus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Successful attempts over all attempts
    pub confidence: f64,
    /// Members whose output matched the consensus
    pub contributors: Vec<WorkerId>,
    pub results: Vec<TaskResult>,
}

/// Pick the most common successful output.
///
/// Ties go to the longest rendered output, then to whichever appeared first.
/// `results` is expected in member order.
pub fn find_consensus(task_id: &str, results: Vec<TaskResult>) -> ConsensusResult {
    // (output, rendered length, supporters), in first-seen order
    let mut candidates: Vec<(&Value, usize, Vec<WorkerId>)> = Vec::new();
    for result in results.iter().filter(|r| r.success) {
        let Some(output) = result.output.as_ref() else {
            continue;
        };
        match candidates.iter_mut().find(|(v, _, _)| *v == output) {
            Some((_, _, supporters)) => supporters.push(result.worker_id.clone()),
            None => candidates.push((output, output.to_string().len(), vec![result.worker_id.clone()])),
        }
    }

    let successes = results.iter().filter(|r| r.success).count();
    let confidence = if results.is_empty() {
        0.0
    } else {
        successes as f64 / results.len() as f64
    };

    let winner = candidates
        .iter()
        .enumerate()
        .max_by(|(ia, (_, la, sa)), (ib, (_, lb, sb))| {
            sa.len()
                .cmp(&sb.len())
                .then(la.cmp(lb))
                .then(ib.cmp(ia))
        })
        .map(|(_, (output, _, supporters))| ((*output).clone(), supporters.clone()));

    let (output, contributors) = match winner {
        Some((output, supporters)) => (Some(output), supporters),
        None => (None, Vec::new()),
    };

    ConsensusResult {
        task_id: task_id.to_string(),
        consensus: output.is_some(),
        output,
        confidence,
        contributors,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskError, TaskErrorKind};
    use serde_json::json;

    fn ok(worker: &str, output: Value) -> TaskResult {
        TaskResult::succeeded(&Task::new("t", ""), worker, output, 5)
    }

    fn failed(worker: &str) -> TaskResult {
        TaskResult::failed(
            &Task::new("t", ""),
            worker,
            TaskError::new(TaskErrorKind::ExecutorFailure, "no"),
            5,
        )
    }

    #[test]
    fn test_majority_wins() {
        let result = find_consensus(
            "t",
            vec![ok("a", json!("yes")), ok("b", json!("no")), ok("c", json!("yes"))],
        );
        assert!(result.consensus);
        assert_eq!(result.output, Some(json!("yes")));
        assert_eq!(result.contributors, vec!["a", "c"]);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_confidence_counts_failures() {
        let result = find_consensus("t", vec![ok("a", json!(1)), failed("b"), ok("c", json!(1))]);
        assert!((result.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.contributors, vec!["a", "c"]);
    }

    #[test]
    fn test_tie_breaks() {
        let longest = find_consensus("t", vec![ok("a", json!("short")), ok("b", json!("much longer"))]);
        assert_eq!(longest.output, Some(json!("much longer")));

        let first = find_consensus("t", vec![ok("a", json!("abc")), ok("b", json!("xyz"))]);
        assert_eq!(first.output, Some(json!("abc")));
    }

    #[test]
    fn test_all_failed() {
        let result = find_consensus("t", vec![failed("a"), failed("b")]);
        assert!(!result.consensus);
        assert!(result.output.is_none());
        assert_eq!(result.confidence, 0.0);
        assert!(result.contributors.is_empty());
    }
}
