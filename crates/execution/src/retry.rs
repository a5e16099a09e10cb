//! Failure classification and the bounded retry policy.

use std::sync::OnceLock;
use std::time::Duration;

use prophet_core::{CostBreakdown, RunStatus};
use regex::Regex;

/// Attempts allowed per task, the first execution included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A classified executor failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Upstream throttled us; retried after a global pause
    #[error("rate limited: {message}")]
    RateLimited {
        /// Upstream message
        message: String,
        /// Pause requested by upstream
        retry_after: Option<Duration>,
    },

    /// Connection-level failure; retried after a global pause like a rate limit
    #[error("network error: {message}")]
    Network {
        /// Upstream message
        message: String,
        /// Pause requested by upstream
        retry_after: Option<Duration>,
    },

    /// Credentials rejected; never retried
    #[error("authentication failed: {message}")]
    Auth {
        /// Upstream message
        message: String,
    },

    /// Any other permanent failure, with the exit status to record
    #[error("{kind}: {message}")]
    Failed {
        /// Status string recorded for the task
        kind: String,
        /// Failure message
        message: String,
    },
}

impl ExecutionError {
    /// Classify a free-form failure message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if matches(rate_limit_re(), &message) {
            ExecutionError::RateLimited { message, retry_after: None }
        } else if matches(auth_re(), &message) {
            ExecutionError::Auth { message }
        } else if matches(network_re(), &message) {
            ExecutionError::Network { message, retry_after: None }
        } else {
            ExecutionError::Failed { kind: "error".to_string(), message }
        }
    }

    /// Build from an explicit kind reported by an executor. Unknown kinds
    /// become permanent failures carrying that kind as their status.
    pub fn from_kind(kind: &str, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match kind {
            "rate_limit" | "rate_limited" => ExecutionError::RateLimited { message, retry_after },
            "network" | "network_error" => ExecutionError::Network { message, retry_after },
            "auth" | "auth_error" => ExecutionError::Auth { message },
            other => ExecutionError::Failed { kind: other.to_string(), message },
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::RateLimited { .. } | ExecutionError::Network { .. })
    }

    /// Pause requested by upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExecutionError::RateLimited { retry_after, .. }
            | ExecutionError::Network { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Failure message without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            ExecutionError::RateLimited { message, .. }
            | ExecutionError::Network { message, .. }
            | ExecutionError::Auth { message }
            | ExecutionError::Failed { message, .. } => message,
        }
    }
}

/// A failed attempt and whatever it spent before failing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    /// What went wrong
    pub error: ExecutionError,
    /// Spend incurred by the failed attempt
    pub cost_spent: f64,
    /// Breakdown of `cost_spent`, if known
    pub cost: Option<CostBreakdown>,
}

impl ExecutionFailure {
    /// A failure that spent nothing.
    pub fn new(error: ExecutionError) -> Self {
        Self { error, cost_spent: 0.0, cost: None }
    }

    /// Attach the attempt's spend.
    pub fn with_cost(mut self, cost_spent: f64) -> Self {
        self.cost_spent = cost_spent;
        self
    }
}

impl From<ExecutionError> for ExecutionFailure {
    fn from(error: ExecutionError) -> Self {
        Self::new(error)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Requeue the task at the back of the queue
    Retry {
        /// Global pause to request first
        pause: Duration,
    },
    /// Record a terminal outcome
    Terminal {
        /// Status to record
        status: RunStatus,
        /// Error detail to record
        detail: String,
    },
}

/// Bounded retry policy for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    default_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, default_backoff: crate::rate_limit::DEFAULT_BACKOFF }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, default_backoff: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), default_backoff }
    }

    /// Attempts allowed per task.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the follow-up for a failure after `attempts` executions.
    pub fn decide(&self, attempts: u32, error: &ExecutionError) -> RetryDecision {
        match error {
            ExecutionError::RateLimited { retry_after, .. }
            | ExecutionError::Network { retry_after, .. }
                if attempts < self.max_attempts =>
            {
                RetryDecision::Retry { pause: retry_after.unwrap_or(self.default_backoff) }
            }
            ExecutionError::RateLimited { .. } => RetryDecision::Terminal {
                status: RunStatus::RateLimitExhausted,
                detail: format!("Rate limit persisted after {} attempts: {}", attempts, error.message()),
            },
            ExecutionError::Network { .. } => RetryDecision::Terminal {
                status: RunStatus::NetworkError,
                detail: format!("Network failure persisted after {} attempts: {}", attempts, error.message()),
            },
            ExecutionError::Auth { message } => RetryDecision::Terminal {
                status: RunStatus::AuthError,
                detail: message.clone(),
            },
            ExecutionError::Failed { kind, message } => RetryDecision::Terminal {
                status: RunStatus::from(kind.clone()),
                detail: message.clone(),
            },
        }
    }
}

fn matches(re: Option<&Regex>, message: &str) -> bool {
    re.is_some_and(|re| re.is_match(message))
}

fn rate_limit_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)429|rate limit").ok()).as_ref()
}

fn auth_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)authentication|unauthorized|permission denied|invalid api key|api key|http 401|status code 401",
        )
        .ok()
    })
    .as_ref()
}

fn network_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)connection|timed out|network").ok()).as_ref()
}
