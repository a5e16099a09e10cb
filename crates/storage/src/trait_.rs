//! Summary storage trait abstraction.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::summary::Summary;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("Invalid summary JSON at {path}: {source}")]
    Json {
        /// File involved
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// Summary is valid JSON with the wrong shape
    #[error("Invalid summary format at {path}: {reason}")]
    Format {
        /// File involved
        path: PathBuf,
        /// What is wrong
        reason: String,
    },
}

/// Persistence backend for the run summary.
///
/// `save` replaces the whole stored summary; backends must make the
/// replacement atomic so readers never observe a partial document.
#[async_trait]
pub trait SummaryStorage: Send + Sync {
    /// Load the stored summary, or `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<Summary>>;

    /// Replace the stored summary.
    async fn save(&self, summary: &Summary) -> Result<()>;
}
