//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::{DEFAULT_BACKOFF, DEFAULT_POLL_INTERVAL};
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::timeout::DEFAULT_TIMEOUT;

/// Options forwarded verbatim to every executor invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Only use search results published before this date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_date_before: Option<String>,
    /// Only use search results published after this date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_date_after: Option<String>,
}

/// Configuration for the batch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent workers
    pub workers: usize,
    /// Global spend ceiling; `0` means unlimited
    pub max_cost: f64,
    /// Spend cap handed to each execution
    pub max_cost_per_run: Option<f64>,
    /// Per-attempt timeout; `None` disables
    pub timeout: Option<Duration>,
    /// Executions allowed per task
    pub max_attempts: u32,
    /// Pause after a rate limit without a retry hint
    pub rate_limit_backoff: Duration,
    /// How often paused workers re-check the pause
    pub pause_poll_interval: Duration,
    /// Root of the output tree; per-task artifacts go under `runs/<task_id>`
    pub output_dir: PathBuf,
    /// Options forwarded to executors
    pub runtime: RuntimeOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_cost: 0.0,
            max_cost_per_run: None,
            timeout: Some(DEFAULT_TIMEOUT),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_backoff: DEFAULT_BACKOFF,
            pause_poll_interval: DEFAULT_POLL_INTERVAL,
            output_dir: PathBuf::from("."),
            runtime: RuntimeOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the global spend ceiling.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = max_cost.max(0.0);
        self
    }

    /// Set the per-task spend cap.
    pub fn with_max_cost_per_run(mut self, cap: Option<f64>) -> Self {
        self.max_cost_per_run = cap.filter(|c| *c > 0.0);
        self
    }

    /// Set the per-attempt timeout; zero disables.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Set the executions allowed per task.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the default rate-limit pause.
    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    /// Set the pause polling interval.
    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    /// Set the output root.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the executor runtime options.
    pub fn with_runtime(mut self, runtime: RuntimeOptions) -> Self {
        self.runtime = runtime;
        self
    }

    /// JSON snapshot for `summary.json`.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "workers": self.workers,
            "max_cost": self.max_cost,
            "max_cost_per_run": self.max_cost_per_run,
            "timeout_seconds": self.timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0),
            "max_attempts": self.max_attempts,
            "rate_limit_backoff_seconds": self.rate_limit_backoff.as_secs_f64(),
            "output_dir": self.output_dir.display().to_string(),
            "runtime": self.runtime,
        })
    }
}
