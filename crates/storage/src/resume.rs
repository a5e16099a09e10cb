//! Resume planning: reconcile a prior summary with the current task list.

use std::collections::HashSet;

use prophet_core::Task;
use serde_json::Value;
use tracing::info;

use crate::summary::{RunMetadata, Summary};

/// How many unexpected ids a mismatch error lists before summarising the rest.
const MISMATCH_PREVIEW: usize = 10;

/// Errors that make a resume unsafe.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResumeError {
    /// The prior summary holds results for tasks outside the current input
    #[error("Resume summary contains task_ids not present in the input set: {}", preview(.unexpected, .total))]
    Mismatch {
        /// Up to ten unexpected ids, sorted
        unexpected: Vec<String>,
        /// Total number of unexpected ids
        total: usize,
    },
}

fn preview(ids: &[String], total: &usize) -> String {
    let total = *total;
    let listed = ids.join(", ");
    if total > ids.len() {
        format!("{} ... (+{} more)", listed, total - ids.len())
    } else {
        listed
    }
}

/// The tasks left to run and the summary the run continues.
#[derive(Debug, Clone)]
pub struct ResumePlan {
    /// Tasks to enqueue, in input order
    pub tasks: Vec<Task>,
    /// Summary to record into
    pub summary: Summary,
    /// Tasks skipped because the prior summary already has them
    pub skipped: usize,
}

impl ResumePlan {
    /// A plan for a fresh run.
    pub fn fresh(tasks: Vec<Task>, eval_config: Value, eval: Value) -> Self {
        Self { tasks, summary: Summary::new(eval_config, eval), skipped: 0 }
    }

    /// Build a plan from the current input and an optional prior summary.
    ///
    /// With no prior summary this is a fresh run. Otherwise every task already
    /// recorded is dropped from the input, the prior outcomes and total cost
    /// carry over, and the new run points back at the prior one.
    pub fn build(
        tasks: Vec<Task>,
        prior: Option<Summary>,
        eval_config: Value,
        eval: Value,
    ) -> Result<Self, ResumeError> {
        let Some(prior) = prior else {
            info!("no existing summary found, starting fresh");
            return Ok(Self::fresh(tasks, eval_config, eval));
        };

        let input_ids: HashSet<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        let mut unexpected: Vec<String> = prior
            .task_ids()
            .filter(|id| !input_ids.contains(id.as_str()))
            .map(|id| id.to_string())
            .collect();
        if !unexpected.is_empty() {
            unexpected.sort();
            let total = unexpected.len();
            unexpected.truncate(MISMATCH_PREVIEW);
            return Err(ResumeError::Mismatch { unexpected, total });
        }

        let original = tasks.len();
        let remaining: Vec<Task> = tasks
            .into_iter()
            .filter(|t| !prior.contains(t.task_id.as_str()))
            .collect();
        let skipped = original - remaining.len();
        info!(skipped, remaining = remaining.len(), "resuming from existing summary");

        let mut run = RunMetadata::start();
        run.resumed_from = prior.run.as_ref().map(|r| r.run_id);

        let mut summary = prior;
        summary.run = Some(run);
        summary.eval_config = eval_config;
        summary.eval = eval;

        Ok(Self { tasks: remaining, summary, skipped })
    }
}
