//! Per-task deadline enforcement.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default per-task timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// The attempt ran past its deadline and was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Run exceeded timeout of {}s", .0.as_secs_f64())]
pub struct TimedOut(pub Duration);

/// Races one execution against its deadline.
///
/// On expiry the attempt's cancellation token fires and its future is dropped;
/// sibling attempts are untouched.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    timeout: Option<Duration>,
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new(Some(DEFAULT_TIMEOUT))
    }
}

impl TimeoutSupervisor {
    /// Create a supervisor; `None` or a zero duration disables the deadline.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout: timeout.filter(|t| !t.is_zero()) }
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Deadline for an attempt starting now.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// Run `fut`, cancelling `cancel` if it does not finish in time.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, fut: F) -> Result<T, TimedOut>
    where
        F: Future<Output = T>,
    {
        let Some(limit) = self.timeout else {
            return Ok(fut.await);
        };
        match tokio::time::timeout(limit, fut).await {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(timeout_secs = limit.as_secs_f64(), "attempt timed out, cancelling");
                cancel.cancel();
                Err(TimedOut(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_cancels() {
        let supervisor = TimeoutSupervisor::new(Some(Duration::from_secs(2)));
        let cancel = CancellationToken::new();

        let result = supervisor
            .run(&cancel, tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(result, Err(TimedOut(Duration::from_secs(2))));
        assert!(cancel.is_cancelled());
        assert_eq!(TimedOut(Duration::from_secs(2)).to_string(), "Run exceeded timeout of 2s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_future_completes() {
        let supervisor = TimeoutSupervisor::new(Some(Duration::from_secs(2)));
        let cancel = CancellationToken::new();
        let result = supervisor.run(&cancel, async { 42 }).await;
        assert_eq!(result, Ok(42));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_disables() {
        let supervisor = TimeoutSupervisor::new(Some(Duration::ZERO));
        assert_eq!(supervisor.timeout(), None);
        assert!(supervisor.deadline().is_none());

        let cancel = CancellationToken::new();
        let result = supervisor
            .run(&cancel, async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                "done"
            })
            .await;
        assert_eq!(result, Ok("done"));
    }
}
