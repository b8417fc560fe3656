//! Merging subtask results back into one answer.

use crate::task::{Task, TaskResult};
use crate::types::{DispatchError, Result, TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Combined output of a decomposed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MergedResult {
    pub task_id: TaskId,
    pub task_type: String,
    pub output: Value,
    /// Within [0, 1], scaled by the share of subtasks that succeeded
    pub confidence: f64,
    pub successful: usize,
    pub total: usize,
    /// Workers whose results went into the merge, in result order
    pub contributors: Vec<WorkerId>,
}

/// Merge `results` according to the original task's type.
///
/// Failed results are ignored. Fails with
/// [`DispatchError::NoSuccessfulSubtasks`] when nothing succeeded.
pub fn merge(results: &[TaskResult], original: &Task) -> Result<MergedResult> {
    let successes: Vec<&TaskResult> = results.iter().filter(|r| r.success).collect();
    if successes.is_empty() {
        return Err(DispatchError::NoSuccessfulSubtasks(original.id.clone()));
    }

    let success_ratio = successes.len() as f64 / results.len() as f64;
    let outputs: Vec<&Value> = successes.iter().filter_map(|r| r.output.as_ref()).collect();

    let (output, confidence) = match original.task_type.as_str() {
        "analysis" => merge_analysis(&outputs, success_ratio),
        "generation" => merge_generation(&outputs, success_ratio),
        _ => (
            json!({
                "results": outputs,
                "count": outputs.len(),
            }),
            success_ratio,
        ),
    };

    let mut contributors: Vec<WorkerId> = Vec::new();
    for result in &successes {
        if !contributors.contains(&result.worker_id) {
            contributors.push(result.worker_id.clone());
        }
    }

    Ok(MergedResult {
        task_id: original.id.clone(),
        task_type: original.task_type.clone(),
        output,
        confidence,
        successful: successes.len(),
        total: results.len(),
        contributors,
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn merge_analysis(outputs: &[&Value], success_ratio: f64) -> (Value, f64) {
    let mut data = Map::new();
    let mut insights = Vec::new();

    for output in outputs {
        if let Some(Value::Object(fields)) = output.get("data") {
            for (k, v) in fields {
                data.insert(k.clone(), v.clone());
            }
        }
        match output.get("insights") {
            Some(Value::Array(items)) => insights.extend(items.iter().cloned()),
            Some(other) if !other.is_null() => insights.push(other.clone()),
            _ => {}
        }
    }

    // Outputs without a confidence count as fully confident.
    let base = mean(
        outputs
            .iter()
            .map(|o| o.get("confidence").and_then(Value::as_f64).unwrap_or(1.0)),
    )
    .unwrap_or(1.0);
    let confidence = (base * success_ratio).clamp(0.0, 1.0);

    (
        json!({
            "combinedData": data,
            "combinedInsights": insights,
            "confidence": confidence,
        }),
        confidence,
    )
}

fn merge_generation(outputs: &[&Value], success_ratio: f64) -> (Value, f64) {
    let blocks: Vec<String> = outputs
        .iter()
        .filter_map(|o| match o.get("content") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => o.as_str().map(str::to_string),
        })
        .collect();

    let average_quality = mean(outputs.iter().filter_map(|o| o.get("quality").and_then(Value::as_f64)));

    (
        json!({
            "content": blocks.join("\n\n"),
            "averageQuality": average_quality,
            "sections": blocks.len(),
        }),
        success_ratio,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskError, TaskErrorKind};

    fn ok(worker: &str, output: Value) -> TaskResult {
        TaskResult::succeeded(&Task::new("sub", ""), worker, output, 10)
    }

    fn failed(worker: &str) -> TaskResult {
        TaskResult::failed(
            &Task::new("sub", ""),
            worker,
            TaskError::new(TaskErrorKind::ExecutorFailure, "down"),
            10,
        )
    }

    #[test]
    fn test_analysis_merge_scales_confidence() {
        let task = Task::new("analysis", "");
        let results = vec![
            ok("a", json!({"data": {"x": 1, "y": 1}, "insights": ["first"], "confidence": 0.9})),
            failed("b"),
            ok("c", json!({"data": {"y": 2}, "insights": ["second"], "confidence": 0.6})),
        ];

        let merged = merge(&results, &task).unwrap();
        assert_eq!(merged.successful, 2);
        assert_eq!(merged.total, 3);
        assert!((merged.confidence - 0.75 * 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(merged.output["combinedData"], json!({"x": 1, "y": 2}));
        assert_eq!(merged.output["combinedInsights"], json!(["first", "second"]));
        assert_eq!(merged.contributors, vec!["a", "c"]);
    }

    #[test]
    fn test_generation_merge() {
        let task = Task::new("generation", "");
        let results = vec![
            ok("a", json!({"content": "Intro", "quality": 0.8})),
            ok("b", json!({"content": "Body", "quality": 0.6})),
        ];

        let merged = merge(&results, &task).unwrap();
        assert_eq!(merged.output["content"], "Intro\n\nBody");
        assert!((merged.output["averageQuality"].as_f64().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(merged.confidence, 1.0);
    }

    #[test]
    fn test_default_merge_collects_outputs() {
        let task = Task::new("translation", "");
        let merged = merge(&[ok("a", json!("hola")), ok("b", json!("ciao"))], &task).unwrap();
        assert_eq!(merged.output["count"], 2);
        assert_eq!(merged.output["results"], json!(["hola", "ciao"]));
    }

    #[test]
    fn test_nothing_to_merge() {
        let task = Task::new("analysis", "").with_id("doomed");
        let err = merge(&[failed("a"), failed("b")], &task).unwrap_err();
        assert!(matches!(err, DispatchError::NoSuccessfulSubtasks(ref id) if id == "doomed"));
    }
}
