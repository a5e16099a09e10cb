//! Process-wide pause shared by workers after upstream rate limiting.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default pause after a rate-limit response without a retry hint.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Longest pause a single report can request.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Default interval at which paused workers re-check the deadline.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Coordinates a global pause across workers.
///
/// One worker hitting a rate limit pauses all of them. The deadline only
/// moves forward: a shorter backoff reported while a longer pause is active
/// does not cut the pause short.
#[derive(Debug)]
pub struct RateLimitCoordinator {
    paused_until: Mutex<Option<Instant>>,
    default_backoff: Duration,
    poll_interval: Duration,
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

impl RateLimitCoordinator {
    /// Create a coordinator with the given default backoff.
    pub fn new(default_backoff: Duration) -> Self {
        Self {
            paused_until: Mutex::new(None),
            default_backoff,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often paused workers re-check the deadline.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Pause every worker for `backoff` (or the default) from now, capped at
    /// [`MAX_BACKOFF`]. Returns the effective backoff.
    pub async fn report_rate_limited(&self, backoff: Option<Duration>) -> Duration {
        let backoff = backoff.unwrap_or(self.default_backoff).min(MAX_BACKOFF);
        let now = Instant::now();
        let until = now.checked_add(backoff).unwrap_or(now);

        let mut paused = self.paused_until.lock().await;
        match *paused {
            Some(current) if current >= until => {
                debug!(?backoff, "rate limit reported inside an existing longer pause");
            }
            _ => {
                warn!(backoff_secs = backoff.as_secs_f64(), "rate limited, pausing all workers");
                *paused = Some(until);
            }
        }
        backoff
    }

    /// The active pause deadline, if any.
    pub async fn paused_until(&self) -> Option<Instant> {
        self.paused_until.lock().await.filter(|until| *until > Instant::now())
    }

    /// Whether a pause is active.
    pub async fn is_paused(&self) -> bool {
        self.paused_until().await.is_some()
    }

    /// Block while a pause is active.
    ///
    /// Returns `false` if `cancel` fired while waiting, `true` otherwise.
    pub async fn wait_if_paused(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let Some(until) = self.paused_until().await else {
                return true;
            };
            let step = until
                .saturating_duration_since(Instant::now())
                .min(self.poll_interval);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_not_paused_initially() {
        let coordinator = RateLimitCoordinator::default();
        assert!(!coordinator.is_paused().await);
        assert!(coordinator.wait_if_paused(&CancellationToken::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_deadline() {
        let coordinator = RateLimitCoordinator::default();
        let start = Instant::now();
        coordinator.report_rate_limited(Some(Duration::from_secs(5))).await;

        assert!(coordinator.wait_if_paused(&CancellationToken::new()).await);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5));
        assert!(waited < Duration::from_secs(6));
        assert!(!coordinator.is_paused().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_backoff_does_not_shorten_pause() {
        let coordinator = RateLimitCoordinator::default();
        coordinator.report_rate_limited(Some(Duration::from_secs(30))).await;
        let long = coordinator.paused_until().await.unwrap();
        coordinator.report_rate_limited(Some(Duration::from_secs(1))).await;
        assert_eq!(coordinator.paused_until().await, Some(long));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_backoff_applies() {
        let coordinator = RateLimitCoordinator::new(Duration::from_secs(60));
        let start = Instant::now();
        let backoff = coordinator.report_rate_limited(None).await;
        assert_eq!(backoff, Duration::from_secs(60));
        let until = coordinator.paused_until().await.unwrap();
        assert_eq!(until - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_backoff_is_capped() {
        let coordinator = RateLimitCoordinator::default();
        let start = Instant::now();
        let backoff = coordinator.report_rate_limited(Some(Duration::from_secs(u64::MAX))).await;
        assert_eq!(backoff, MAX_BACKOFF);
        assert_eq!(coordinator.paused_until().await.unwrap() - start, MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let coordinator = Arc::new(RateLimitCoordinator::default());
        coordinator.report_rate_limited(Some(Duration::from_secs(600))).await;
        let cancel = CancellationToken::new();

        let waiter = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.wait_if_paused(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert!(!waiter.await.unwrap());
        assert!(coordinator.is_paused().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_waiters_resume_together() {
        let coordinator = Arc::new(RateLimitCoordinator::default());
        coordinator.report_rate_limited(Some(Duration::from_secs(10))).await;
        let start = Instant::now();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.wait_if_paused(&CancellationToken::new()).await;
                    Instant::now()
                })
            })
            .collect();

        for w in waiters {
            let resumed = w.await.unwrap();
            assert!(resumed - start >= Duration::from_secs(10));
        }
    }
}
