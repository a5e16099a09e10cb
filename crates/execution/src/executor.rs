//! The single-task executor seam.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use prophet_core::{CostBreakdown, RunStatus, Task};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeOptions;
use crate::retry::ExecutionFailure;

/// Everything an executor needs for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Task to forecast
    pub task: Arc<Task>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Spend cap for this attempt
    pub cost_cap: Option<f64>,
    /// When the attempt will be cancelled
    pub deadline: Option<Instant>,
    /// Directory for this task's artifacts; may not exist yet
    pub output_dir: PathBuf,
    /// Forwarded options
    pub runtime: RuntimeOptions,
    /// Fires on timeout
    pub cancel: CancellationToken,
}

/// What a finished attempt produced.
///
/// A status other than `submitted` is a permanent result for the task; it is
/// recorded as-is and not retried.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionReport {
    /// Exit status
    #[serde(default = "submitted")]
    pub status: RunStatus,
    /// Spend of this attempt
    #[serde(default)]
    pub cost_spent: f64,
    /// Breakdown of the spend
    #[serde(default)]
    pub cost: Option<CostBreakdown>,
    /// Structured forecast
    #[serde(default)]
    pub submission: Option<serde_json::Value>,
    /// Scoring against ground truth
    #[serde(default)]
    pub evaluation: Option<serde_json::Value>,
    /// Detail for non-submitted statuses
    #[serde(default)]
    pub error: Option<String>,
}

fn submitted() -> RunStatus {
    RunStatus::Submitted
}

impl ExecutionReport {
    /// A successful report with the given spend.
    pub fn submitted(cost_spent: f64) -> Self {
        Self {
            status: RunStatus::Submitted,
            cost_spent,
            cost: None,
            submission: None,
            evaluation: None,
            error: None,
        }
    }

    /// Spend of this attempt, taken from the breakdown when only that is set.
    pub fn spent(&self) -> f64 {
        match self.cost {
            Some(cost) if self.cost_spent == 0.0 => cost.total,
            _ => self.cost_spent,
        }
    }
}

/// Runs one attempt of one task.
///
/// Implementations should return promptly once `request.cancel` fires; the
/// engine drops the future on timeout either way.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute one attempt.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutionFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_defaults_to_submitted() {
        let report: ExecutionReport =
            serde_json::from_str(r#"{"cost": {"model": 0.1, "search": 0.2, "total": 0.3}}"#).unwrap();
        assert_eq!(report.status, RunStatus::Submitted);
        assert!((report.spent() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_report_custom_status() {
        let report: ExecutionReport =
            serde_json::from_str(r#"{"status": "FormatError", "cost_spent": 0.2, "error": "no json"}"#)
                .unwrap();
        assert_eq!(report.status, RunStatus::Failed("FormatError".into()));
        assert_eq!(report.spent(), 0.2);
    }
}
