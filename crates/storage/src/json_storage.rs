//! JSON file storage implementation.
//!
//! Keeps the summary as a single pretty-printed `summary.json` in the output
//! directory. Saves go through a sibling temporary file and a rename so a
//! crash mid-write leaves the previous summary intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{Result, StorageError, Summary, SummaryStorage};

/// File name of the summary inside the output directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// File-based JSON summary backend.
#[derive(Debug, Clone)]
pub struct JsonSummaryStorage {
    path: PathBuf,
}

impl JsonSummaryStorage {
    /// Store `summary.json` inside `output_dir`.
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self { path: output_dir.as_ref().join(SUMMARY_FILE) }
    }

    /// Store the summary at an explicit file path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the summary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, path: &Path) -> impl FnOnce(std::io::Error) -> StorageError {
        let path = path.to_path_buf();
        move |source| StorageError::Io { path, source }
    }
}

#[async_trait]
impl SummaryStorage for JsonSummaryStorage {
    async fn load(&self) -> Result<Option<Summary>> {
        let Some(value) = read_json::<serde_json::Value>(&self.path).await? else {
            return Ok(None);
        };
        let summary = Summary::from_value(value)
            .map_err(|reason| StorageError::Format { path: self.path.clone(), reason })?;
        debug!(path = %self.path.display(), runs = summary.len(), "loaded summary");
        Ok(Some(summary))
    }

    async fn save(&self, summary: &Summary) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(self.io_err(parent))?;
        }

        let json = serde_json::to_string_pretty(summary)
            .map_err(|source| StorageError::Json { path: self.path.clone(), source })?;

        let tmp = self.tmp_path();
        fs::write(&tmp, json.as_bytes()).await.map_err(self.io_err(&tmp))?;
        fs::rename(&tmp, &self.path).await.map_err(self.io_err(&self.path))?;
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)
                .map_err(|source| StorageError::Json { path: path.to_path_buf(), source })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io { path: path.to_path_buf(), source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prophet_core::{RunOutcome, RunStatus, Task};
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_summary_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSummaryStorage::new(dir.path());
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSummaryStorage::new(dir.path().join("nested"));

        let mut summary = Summary::new(json!({"workers": 2}), json!({"dataset_name": "d"}));
        let task = Task::new("a", "Q", vec!["Y".into(), "N".into()]);
        let mut outcome = RunOutcome::new(&task, RunStatus::Submitted);
        outcome.cost_spent = 0.75;
        summary.upsert(outcome);
        summary.total_cost = 0.75;

        storage.save(&summary).await.unwrap();
        assert!(!storage.tmp_path().exists());

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.eval_config, json!({"workers": 2}));
        assert_eq!(loaded.run, summary.run);
        assert!((loaded.total_cost - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_json_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSummaryStorage::new(dir.path());
        tokio::fs::write(storage.path(), "{not json").await.unwrap();

        let err = storage.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Json { .. }));
        assert!(err.to_string().contains("summary.json"));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSummaryStorage::new(dir.path());
        tokio::fs::write(storage.path(), r#"{"runs": 3}"#).await.unwrap();

        let err = storage.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Format { .. }));
    }
}
