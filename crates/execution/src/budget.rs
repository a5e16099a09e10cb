//! Global cost budget shared by all workers.

use tokio::sync::Mutex;

/// Running total of spend against an optional global ceiling.
///
/// The ceiling is checked at dispatch only: a task that starts under budget
/// runs to completion even if its cost pushes the total past the limit.
#[derive(Debug)]
pub struct BudgetTracker {
    max_cost: f64,
    max_cost_per_run: Option<f64>,
    total: Mutex<f64>,
}

impl BudgetTracker {
    /// Create a tracker. `max_cost <= 0` means unlimited.
    pub fn new(max_cost: f64) -> Self {
        Self { max_cost, max_cost_per_run: None, total: Mutex::new(0.0) }
    }

    /// Set the per-task cap handed to executors.
    pub fn with_max_cost_per_run(mut self, cap: Option<f64>) -> Self {
        self.max_cost_per_run = cap.filter(|c| *c > 0.0);
        self
    }

    /// Start from spend carried over from an earlier run.
    pub fn with_initial_total(mut self, spent: f64) -> Self {
        self.total = Mutex::new(spent.max(0.0));
        self
    }

    /// Whether a ceiling is configured.
    pub fn is_limited(&self) -> bool {
        self.max_cost > 0.0
    }

    /// The configured ceiling (`0` when unlimited).
    pub fn max_cost(&self) -> f64 {
        self.max_cost
    }

    /// Per-task cap for executors.
    pub fn max_cost_per_run(&self) -> Option<f64> {
        self.max_cost_per_run
    }

    /// Whether new dispatches must be refused.
    pub async fn is_exhausted(&self) -> bool {
        self.is_limited() && *self.total.lock().await >= self.max_cost
    }

    /// Add spend and return the new total.
    pub async fn record(&self, cost: f64) -> f64 {
        let mut total = self.total.lock().await;
        if cost.is_finite() && cost > 0.0 {
            *total += cost;
        }
        *total
    }

    /// Spend so far.
    pub async fn total_spent(&self) -> f64 {
        *self.total.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_exhausts() {
        let budget = BudgetTracker::new(0.0);
        budget.record(1_000.0).await;
        assert!(!budget.is_exhausted().await);
    }

    #[tokio::test]
    async fn test_exhausts_at_ceiling() {
        let budget = BudgetTracker::new(1.0).with_initial_total(0.4);
        assert!(!budget.is_exhausted().await);
        assert!((budget.record(0.6).await - 1.0).abs() < 1e-9);
        assert!(budget.is_exhausted().await);
    }

    #[tokio::test]
    async fn test_ignores_negative_and_nan_cost() {
        let budget = BudgetTracker::new(1.0);
        budget.record(-5.0).await;
        budget.record(f64::NAN).await;
        assert_eq!(budget.total_spent().await, 0.0);
    }

    #[test]
    fn test_per_run_cap_zero_means_none() {
        let budget = BudgetTracker::new(1.0).with_max_cost_per_run(Some(0.0));
        assert_eq!(budget.max_cost_per_run(), None);
        let budget = BudgetTracker::new(1.0).with_max_cost_per_run(Some(0.25));
        assert_eq!(budget.max_cost_per_run(), Some(0.25));
    }

    #[tokio::test]
    async fn test_concurrent_records_sum() {
        let budget = std::sync::Arc::new(BudgetTracker::new(0.0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let budget = budget.clone();
                tokio::spawn(async move { budget.record(0.5).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert!((budget.total_spent().await - 5.0).abs() < 1e-9);
    }
}
