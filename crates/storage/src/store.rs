//! Incremental summary recorder shared by engine workers.

use std::sync::Arc;

use prophet_core::RunOutcome;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Result, Summary, SummaryStorage};

/// Owns the in-progress summary and persists it after every recorded outcome.
///
/// The summary mutex is held across the backend write so saves are applied in
/// the order outcomes were recorded.
pub struct SummaryStore {
    summary: Mutex<Summary>,
    storage: Arc<dyn SummaryStorage>,
}

impl SummaryStore {
    /// Wrap a summary and the backend it is persisted to.
    pub fn new(summary: Summary, storage: Arc<dyn SummaryStorage>) -> Self {
        Self { summary: Mutex::new(summary), storage }
    }

    /// Record a terminal outcome and persist the summary.
    ///
    /// `total_cost` is the budget total observed by the caller; the stored
    /// total never decreases, so concurrent recorders cannot roll it back.
    pub async fn record(&self, outcome: RunOutcome, total_cost: f64) -> Result<()> {
        let mut summary = self.summary.lock().await;
        debug!(task_id = %outcome.task_id, status = %outcome.status, "recording outcome");
        summary.upsert(outcome);
        if total_cost > summary.total_cost {
            summary.total_cost = total_cost;
        }
        summary.touch();
        self.storage.save(&summary).await
    }

    /// Persist the current summary without changing outcomes.
    pub async fn flush(&self) -> Result<()> {
        let mut summary = self.summary.lock().await;
        summary.touch();
        self.storage.save(&summary).await
    }

    /// Copy of the current summary.
    pub async fn snapshot(&self) -> Summary {
        self.summary.lock().await.clone()
    }
}

impl std::fmt::Debug for SummaryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySummaryStorage;
    use prophet_core::{RunStatus, Task};
    use serde_json::Value;

    #[tokio::test]
    async fn test_record_persists_each_outcome() {
        let backend = Arc::new(MemorySummaryStorage::new());
        let store = SummaryStore::new(Summary::new(Value::Null, Value::Null), backend.clone());

        for (id, cost) in [("a", 0.5), ("b", 1.0)] {
            let task = Task::new(id, "Q", vec!["Y".into(), "N".into()]);
            store.record(RunOutcome::new(&task, RunStatus::Submitted), cost).await.unwrap();
        }

        assert_eq!(backend.save_count().await, 2);
        let saved = backend.load().await.unwrap().unwrap();
        assert_eq!(saved.len(), 2);
        assert!((saved.total_cost - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_total_cost_never_decreases() {
        let backend = Arc::new(MemorySummaryStorage::new());
        let store = SummaryStore::new(Summary::new(Value::Null, Value::Null), backend);
        let task = Task::new("a", "Q", vec!["Y".into(), "N".into()]);

        store.record(RunOutcome::new(&task, RunStatus::Submitted), 2.0).await.unwrap();
        store.record(RunOutcome::new(&task, RunStatus::Submitted), 1.5).await.unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!((snapshot.total_cost - 2.0).abs() < 1e-9);
    }
}
