//! Run outcomes - the terminal result of executing one task.

use serde::{Deserialize, Deserializer, Serialize};

use crate::id::TaskId;
use crate::task::Task;

/// Terminal exit status of a task.
///
/// Serialized as the plain status string used in `summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RunStatus {
    /// The executor produced a forecast
    Submitted,
    /// Upstream rejected our credentials
    AuthError,
    /// Retryable network failures exhausted the retry budget
    NetworkError,
    /// Rate limiting persisted across every allowed attempt
    RateLimitExhausted,
    /// The attempt exceeded its deadline
    Timeout,
    /// Never started because the global budget was already spent
    SkippedCostLimit,
    /// Recorded without a status; only read back from older summaries
    #[default]
    Pending,
    /// Any other executor-reported exit status, carried verbatim
    Failed(String),
}

impl RunStatus {
    /// The status string written to the summary.
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Submitted => "submitted",
            RunStatus::AuthError => "auth_error",
            RunStatus::NetworkError => "network_error",
            RunStatus::RateLimitExhausted => "rate_limit_exhausted",
            RunStatus::Timeout => "BatchRunTimeoutError",
            RunStatus::SkippedCostLimit => "skipped_cost_limit",
            RunStatus::Pending => "pending",
            RunStatus::Failed(kind) => kind,
        }
    }

    /// Whether a forecast was produced.
    pub fn is_submitted(&self) -> bool {
        matches!(self, RunStatus::Submitted)
    }

    /// Whether the task was skipped without running.
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunStatus::SkippedCostLimit)
    }

    /// Whether the entry carries no terminal status.
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Pending)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "submitted" => RunStatus::Submitted,
            "auth_error" => RunStatus::AuthError,
            "network_error" => RunStatus::NetworkError,
            "rate_limit_exhausted" => RunStatus::RateLimitExhausted,
            "BatchRunTimeoutError" => RunStatus::Timeout,
            "skipped_cost_limit" => RunStatus::SkippedCostLimit,
            "pending" => RunStatus::Pending,
            _ => RunStatus::Failed(s),
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Failed(kind) => kind,
            other => other.as_str().to_string(),
        }
    }
}

/// Cost split reported by executors that track model and search spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Model (LLM) spend
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: f64,
    /// Search backend spend
    #[serde(default, deserialize_with = "null_as_default")]
    pub search: f64,
    /// Total spend
    #[serde(default, deserialize_with = "null_as_default")]
    pub total: f64,
}

impl CostBreakdown {
    /// Sum two breakdowns component-wise.
    pub fn add(self, other: CostBreakdown) -> CostBreakdown {
        CostBreakdown {
            model: self.model + other.model,
            search: self.search + other.search,
            total: self.total + other.total,
        }
    }
}

/// Result of executing one task to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Task this outcome belongs to
    #[serde(alias = "run_id")]
    pub task_id: TaskId,

    /// Task title, for human readers of the summary
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,

    /// Terminal status; `pending` when absent
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: RunStatus,

    /// Money spent across all attempts
    #[serde(default, deserialize_with = "null_as_default")]
    pub cost_spent: f64,

    /// Optional breakdown of `cost_spent`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,

    /// Structured forecast, if one was produced
    #[serde(default)]
    pub submission: Option<serde_json::Value>,

    /// Scoring against ground truth, if the executor evaluated
    #[serde(default)]
    pub evaluation: Option<serde_json::Value>,

    /// Per-task artifact directory, relative to the output root
    #[serde(default, alias = "output_dir", deserialize_with = "null_as_default")]
    pub output_path: String,

    /// Failure description
    #[serde(default, alias = "error")]
    pub error_detail: Option<String>,

    /// Number of executor attempts made
    #[serde(default, deserialize_with = "null_as_default")]
    pub attempts: u32,
}

impl RunOutcome {
    /// Create an outcome for a task with no cost and no payload.
    pub fn new(task: &Task, status: RunStatus) -> Self {
        Self {
            task_id: task.task_id.clone(),
            title: task.title.clone(),
            status,
            cost_spent: 0.0,
            cost: None,
            submission: None,
            evaluation: None,
            output_path: artifact_dir(&task.task_id),
            error_detail: None,
            attempts: 0,
        }
    }

    /// Outcome for a task that was never started because the budget ran out.
    pub fn skipped_for_budget(task: &Task, max_cost: f64) -> Self {
        Self::new(task, RunStatus::SkippedCostLimit)
            .with_error(format!("Total eval cost limit (${:.2}) reached.", max_cost))
    }

    /// Attach a failure description.
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Fill `cost_spent` from a legacy `cost` breakdown when it was not stored.
    pub fn normalize(mut self) -> Self {
        if self.cost_spent == 0.0 {
            if let Some(cost) = self.cost {
                self.cost_spent = cost.total;
            }
        }
        self
    }
}

/// Read `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Relative artifact directory for a task inside the output root.
pub fn artifact_dir(task_id: &TaskId) -> String {
    format!("runs/{}", task_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(RunStatus::Timeout.as_str(), "BatchRunTimeoutError");
        assert_eq!(RunStatus::from("skipped_cost_limit".to_string()), RunStatus::SkippedCostLimit);
        assert_eq!(
            RunStatus::from("FormatError".to_string()),
            RunStatus::Failed("FormatError".to_string())
        );
    }

    #[test]
    fn test_status_serializes_as_string() {
        let json = serde_json::to_string(&RunStatus::RateLimitExhausted).unwrap();
        assert_eq!(json, "\"rate_limit_exhausted\"");
        let back: RunStatus = serde_json::from_str("\"custom_exit\"").unwrap();
        assert_eq!(back, RunStatus::Failed("custom_exit".to_string()));
    }

    #[test]
    fn test_legacy_outcome_fields() {
        let legacy = serde_json::json!({
            "run_id": "r1",
            "title": "t",
            "status": "submitted",
            "cost": {"model": 0.2, "search": 0.3, "total": 0.5},
            "error": null,
            "output_dir": "runs/r1"
        });
        let outcome: RunOutcome = serde_json::from_value(legacy).unwrap();
        let outcome = outcome.normalize();
        assert_eq!(outcome.task_id.as_str(), "r1");
        assert_eq!(outcome.output_path, "runs/r1");
        assert!((outcome.cost_spent - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_status_and_null_costs() {
        let entry = serde_json::json!({
            "run_id": "r2",
            "title": null,
            "cost_spent": null,
            "cost": {"model": null, "search": 0.1, "total": null},
            "output_dir": null
        });
        let outcome: RunOutcome = serde_json::from_value(entry).unwrap();
        assert_eq!(outcome.status, RunStatus::Pending);
        assert_eq!(outcome.cost_spent, 0.0);
        assert_eq!(outcome.cost.map(|c| c.search), Some(0.1));
        assert_eq!(outcome.output_path, "");

        let status: RunStatus = serde_json::from_str("\"pending\"").unwrap();
        assert!(status.is_pending());
    }

    #[test]
    fn test_skipped_outcome() {
        let task = Task::new("c", "Q", vec!["A".into(), "B".into()]);
        let outcome = RunOutcome::skipped_for_budget(&task, 1.5);
        assert!(outcome.status.is_skipped());
        assert_eq!(outcome.output_path, "runs/c");
        assert_eq!(outcome.error_detail.as_deref(), Some("Total eval cost limit ($1.50) reached."));
    }
}
