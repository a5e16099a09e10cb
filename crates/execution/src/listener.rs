//! Mirror engine events to `tracing`.

use prophet_core::{EngineEvent, EngineListener};
use tracing::{debug, info, warn};

/// Logs every engine event at a level matching its importance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl EngineListener for TracingListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::RunStarted { run_id, total, workers } => {
                info!(target: "prophet::engine", %run_id, total, workers, "run started");
            }
            EngineEvent::TaskStarted { task_id, attempt } => {
                debug!(target: "prophet::engine", %task_id, attempt, "task started");
            }
            EngineEvent::TaskRetrying { task_id, attempt, backoff, reason } => {
                warn!(
                    target: "prophet::engine",
                    %task_id,
                    attempt,
                    backoff_secs = backoff.as_secs_f64(),
                    %reason,
                    "task retrying"
                );
            }
            EngineEvent::TaskCompleted { task_id, status, cost_spent } => {
                info!(target: "prophet::engine", %task_id, %status, cost = cost_spent, "task completed");
            }
            EngineEvent::Paused { backoff } => {
                warn!(target: "prophet::engine", backoff_secs = backoff.as_secs_f64(), "workers paused");
            }
            EngineEvent::BudgetExhausted { total_spent, max_cost } => {
                warn!(target: "prophet::engine", total_spent, max_cost, "budget exhausted");
            }
            EngineEvent::Progress(update) => {
                debug!(
                    target: "prophet::engine",
                    completed = update.completed,
                    total = update.total,
                    cost = update.total_cost,
                    "progress"
                );
            }
            EngineEvent::RunFinished { completed, total, total_cost, interrupted } => {
                info!(target: "prophet::engine", completed, total, total_cost, interrupted, "run finished");
            }
        }
    }
}
