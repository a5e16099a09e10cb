//! Throttled progress logging.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use prophet_core::{EngineEvent, EngineListener, ProgressUpdate};
use tracing::info;

/// Default spacing between progress log lines.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Logs a one-line progress summary at most once per interval.
///
/// The final update of a run (all tasks completed) is always logged.
#[derive(Debug)]
pub struct LogReporter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}

impl LogReporter {
    /// Create a reporter with the given spacing.
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: Mutex::new(None) }
    }

    /// Whether an update should be logged now. Records the time when it should.
    fn should_report(&self, update: &ProgressUpdate) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let due = match *last {
            None => true,
            Some(prev) => now.duration_since(prev) >= self.interval,
        };
        if due || update.completed >= update.total {
            *last = Some(now);
            return true;
        }
        false
    }
}

/// Format a progress update as a single line.
pub fn format_progress(update: &ProgressUpdate) -> String {
    let percent = if update.total == 0 {
        100.0
    } else {
        update.completed as f64 * 100.0 / update.total as f64
    };
    format!(
        "{}/{} tasks ({:.1}%), ${:.2} spent, {}s elapsed",
        update.completed,
        update.total,
        percent,
        update.total_cost,
        update.elapsed.as_secs()
    )
}

impl EngineListener for LogReporter {
    fn on_event(&self, event: &EngineEvent) {
        if let EngineEvent::Progress(update) = event {
            if self.should_report(update) {
                info!(target: "prophet::progress", "{}", format_progress(update));
            }
        }
    }
}
