//! Completion time estimation.

use std::time::Duration;

/// Estimates time to completion from observed throughput.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionEstimator;

impl CompletionEstimator {
    /// Estimate remaining time: remaining tasks at the average pace so far.
    ///
    /// Returns `None` until at least one task has completed.
    pub fn estimate_remaining(&self, completed: usize, total: usize, elapsed: Duration) -> Option<Duration> {
        if completed == 0 {
            return None;
        }
        let remaining = total.saturating_sub(completed) as u32;
        let per_task = elapsed / completed as u32;
        Some(per_task * remaining)
    }

    /// Completed tasks per minute.
    pub fn throughput_per_minute(&self, completed: usize, elapsed: Duration) -> f64 {
        let minutes = elapsed.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        completed as f64 / minutes
    }
}
