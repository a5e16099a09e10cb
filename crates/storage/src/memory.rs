//! In-memory summary backend.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Result, Summary, SummaryStorage};

/// Keeps the last saved summary in memory. Counts saves so callers can
/// check that outcomes were persisted one by one.
#[derive(Debug, Default)]
pub struct MemorySummaryStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    summary: Option<Summary>,
    saves: usize,
}

impl MemorySummaryStorage {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far.
    pub async fn save_count(&self) -> usize {
        self.inner.lock().await.saves
    }
}

#[async_trait]
impl SummaryStorage for MemorySummaryStorage {
    async fn load(&self) -> Result<Option<Summary>> {
        Ok(self.inner.lock().await.summary.clone())
    }

    async fn save(&self, summary: &Summary) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.summary = Some(summary.clone());
        inner.saves += 1;
        Ok(())
    }
}
