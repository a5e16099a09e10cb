//! The persisted run summary.

use std::collections::HashMap;

use chrono::Utc;
use prophet_core::{RunId, RunOutcome, RunStatus, TaskId, Time};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Identity and timing of the engine run that wrote the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// This run
    pub run_id: RunId,
    /// When this run started
    pub started_at: Time,
    /// Last write
    pub updated_at: Time,
    /// The run whose summary this one continues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<RunId>,
}

impl RunMetadata {
    /// Metadata for a run starting now.
    pub fn start() -> Self {
        let now = Utc::now();
        Self { run_id: RunId::new(), started_at: now, updated_at: now, resumed_from: None }
    }
}

/// Final outcomes keyed by task id, plus run metadata.
///
/// Outcomes keep insertion order for stable output; recording an outcome for
/// an id already present replaces it in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Run metadata; absent in summaries written by older tools
    pub run: Option<RunMetadata>,
    /// Snapshot of the resolved configuration
    pub eval_config: Value,
    /// Dataset provenance
    pub eval: Value,
    /// Budget spent, cumulative across resumed runs
    pub total_cost: f64,
    /// Final outcome per task
    pub runs: Vec<RunOutcome>,
    #[serde(skip)]
    index: HashMap<TaskId, usize>,
}

impl Summary {
    /// Create an empty summary for a fresh run.
    pub fn new(eval_config: Value, eval: Value) -> Self {
        Self {
            run: Some(RunMetadata::start()),
            eval_config,
            eval,
            total_cost: 0.0,
            runs: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a summary from a parsed `summary.json` document.
    ///
    /// `runs` must be an array. Entries that are not objects, or that carry no
    /// task id, are ignored; a later entry for the same id wins. An entry with
    /// an id but unreadable fields is kept with whatever could be read, so the
    /// task still counts as recorded.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut doc) = value else {
            return Err("summary must be a JSON object".to_string());
        };

        let runs = match doc.remove("runs") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => return Err("'runs' must be a list".to_string()),
        };

        let run = doc
            .remove("run")
            .and_then(|v| serde_json::from_value::<RunMetadata>(v).ok());
        let total_cost = doc.get("total_cost").and_then(Value::as_f64).unwrap_or(0.0);

        let mut summary = Self {
            run,
            eval_config: doc.remove("eval_config").unwrap_or(Value::Null),
            eval: doc.remove("eval").unwrap_or(Value::Null),
            total_cost,
            runs: Vec::new(),
            index: HashMap::new(),
        };

        for item in runs {
            if !item.is_object() {
                continue;
            }
            let outcome = match serde_json::from_value::<RunOutcome>(item.clone()) {
                Ok(outcome) => outcome.normalize(),
                Err(e) => {
                    let Some(outcome) = partial_outcome(&item) else {
                        continue;
                    };
                    warn!(task_id = %outcome.task_id, error = %e, "summary entry partly unreadable");
                    outcome
                }
            };
            if outcome.task_id.is_empty() {
                continue;
            }
            summary.upsert(outcome);
        }

        Ok(summary)
    }

    /// Insert or replace the outcome for its task.
    pub fn upsert(&mut self, outcome: RunOutcome) {
        match self.index.get(&outcome.task_id) {
            Some(&pos) => self.runs[pos] = outcome,
            None => {
                self.index.insert(outcome.task_id.clone(), self.runs.len());
                self.runs.push(outcome);
            }
        }
    }

    /// Outcome recorded for a task.
    pub fn get(&self, task_id: &str) -> Option<&RunOutcome> {
        self.index.get(task_id).map(|&pos| &self.runs[pos])
    }

    /// Whether an outcome is recorded for a task.
    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// Recorded task ids, in insertion order.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.runs.iter().map(|r| &r.task_id)
    }

    /// Number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether no outcome is recorded.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Stamp `updated_at`.
    pub fn touch(&mut self) {
        if let Some(run) = &mut self.run {
            run.updated_at = Utc::now();
        }
    }
}

/// Best-effort read of a summary entry that does not deserialize cleanly.
fn partial_outcome(item: &Value) -> Option<RunOutcome> {
    let id = ["task_id", "run_id"].iter().find_map(|key| match item.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })?;
    let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);
    let payload = |key: &str| item.get(key).filter(|v| !v.is_null()).cloned();

    Some(RunOutcome {
        task_id: TaskId::new(id),
        title: text("title").unwrap_or_default(),
        status: text("status").map(RunStatus::from).unwrap_or_default(),
        cost_spent: item.get("cost_spent").and_then(Value::as_f64).unwrap_or(0.0),
        cost: None,
        submission: payload("submission"),
        evaluation: payload("evaluation"),
        output_path: text("output_path").or_else(|| text("output_dir")).unwrap_or_default(),
        error_detail: text("error_detail").or_else(|| text("error")),
        attempts: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prophet_core::{RunStatus, Task};
    use serde_json::json;

    fn outcome(id: &str, status: RunStatus) -> RunOutcome {
        let task = Task::new(id, "Q", vec!["A".into(), "B".into()]);
        RunOutcome::new(&task, status)
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut summary = Summary::new(Value::Null, Value::Null);
        summary.upsert(outcome("a", RunStatus::NetworkError));
        summary.upsert(outcome("b", RunStatus::Submitted));
        summary.upsert(outcome("a", RunStatus::Submitted));

        assert_eq!(summary.len(), 2);
        let ids: Vec<&str> = summary.task_ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(summary.get("a").unwrap().status, RunStatus::Submitted);
    }

    #[test]
    fn test_from_value_accepts_legacy_summary() {
        let doc = json!({
            "eval_config": {"workers": 2},
            "total_cost": 1.25,
            "runs": [
                {"run_id": "r1", "status": "submitted", "cost": {"total": 0.5}},
                "garbage",
                {"run_id": "", "status": "submitted"},
                {"run_id": "r2", "status": "auth_error", "error": "bad key"}
            ]
        });
        let summary = Summary::from_value(doc).unwrap();
        assert!(summary.run.is_none());
        assert_eq!(summary.len(), 2);
        assert!((summary.total_cost - 1.25).abs() < 1e-9);
        assert!((summary.get("r1").unwrap().cost_spent - 0.5).abs() < 1e-9);
        assert_eq!(summary.get("r2").unwrap().error_detail.as_deref(), Some("bad key"));
    }

    #[test]
    fn test_from_value_keeps_partly_readable_entries() {
        let doc = json!({
            "runs": [
                {"run_id": "r1", "cost": null},
                {"run_id": "r2", "status": "submitted", "cost_spent": "n/a", "title": "Q2"},
                {"task_id": 7, "status": "auth_error"}
            ]
        });
        let summary = Summary::from_value(doc).unwrap();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary.get("r1").unwrap().status, RunStatus::Pending);
        assert_eq!(summary.get("r1").unwrap().cost_spent, 0.0);
        let r2 = summary.get("r2").unwrap();
        assert_eq!(r2.status, RunStatus::Submitted);
        assert_eq!(r2.title, "Q2");
        assert_eq!(r2.cost_spent, 0.0);
        assert_eq!(summary.get("7").unwrap().status, RunStatus::AuthError);
    }

    #[test]
    fn test_from_value_rejects_non_list_runs() {
        let err = Summary::from_value(json!({"runs": {"a": 1}})).unwrap_err();
        assert!(err.contains("'runs' must be a list"));
    }

    #[test]
    fn test_serialized_shape() {
        let mut summary = Summary::new(json!({"workers": 1}), json!({"dataset_ref": "x"}));
        summary.upsert(outcome("a", RunStatus::Submitted));
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value["run"]["run_id"].is_string());
        assert!(value["runs"].is_array());
        assert_eq!(value["runs"][0]["task_id"], json!("a"));
        assert!(value.get("index").is_none());
    }
}
