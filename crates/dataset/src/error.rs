//! Dataset error types.

use std::path::PathBuf;

/// Error type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Why a single row failed schema validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// The row is not a JSON object
    #[error("row must be a JSON object")]
    NotAnObject,

    /// A field has the wrong shape
    #[error("{0}")]
    Malformed(String),

    /// Title missing or blank
    #[error("title must be a non-empty string")]
    EmptyTitle,

    /// Fewer than two non-empty outcomes
    #[error("outcomes must contain at least 2 non-empty strings")]
    TooFewOutcomes,

    /// Ground truth keys differ from the outcome set
    #[error("ground_truth keys mismatch: {}", describe_mismatch(.missing, .unknown))]
    GroundTruthKeys {
        /// Outcomes without a label
        missing: Vec<String>,
        /// Labels for outcomes that do not exist
        unknown: Vec<String>,
    },

    /// Ground truth labels outside {0, 1}
    #[error("ground_truth values must be 0/1 for outcomes: {0:?}")]
    GroundTruthValues(Vec<String>),

    /// An outcome is not a string
    #[error("outcomes must be strings, found {0}")]
    NonStringOutcome(String),

    /// `predict_by` is not a recognisable date
    #[error("predict_by '{0}' is not a valid date")]
    PredictBy(String),

    /// Shifting `predict_by` by the offset leaves the calendar
    #[error("predict_by '{predict_by}' shifted by {offset} days is out of range")]
    DateOffset {
        /// The unshifted date
        predict_by: String,
        /// Days subtracted
        offset: i64,
    },
}

fn describe_mismatch(missing: &[String], unknown: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing outcomes: {:?}", missing));
    }
    if !unknown.is_empty() {
        parts.push(format!("unknown outcomes: {:?}", unknown));
    }
    parts.join("; ")
}

/// Errors that can occur while loading or resolving a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A line is not valid JSON
    #[error("Invalid JSON at line {line}: {source}")]
    InvalidJson {
        /// 1-based line number
        line: usize,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// A line is valid JSON but not a valid task row
    #[error("Line {line}: invalid task schema: {source}")]
    InvalidRow {
        /// 1-based line number
        line: usize,
        /// Schema violation
        #[source]
        source: SchemaError,
    },

    /// Two rows share a task id
    #[error("Line {line}: duplicate task_id '{task_id}'.")]
    DuplicateId {
        /// 1-based line number of the second occurrence
        line: usize,
        /// Repeated id
        task_id: String,
    },

    /// Dataset reference could not be parsed
    #[error("invalid dataset ref '{reference}': {reason}")]
    InvalidRef {
        /// The raw reference
        reference: String,
        /// What is wrong with it
        reason: String,
    },

    /// Registry payload or lookup failure
    #[error("registry error: {0}")]
    Registry(String),

    /// Dataset resolved but not materialised locally
    #[error("dataset '{reference}' is not cached at {path}; fetch it first")]
    NotCached {
        /// The dataset reference
        reference: String,
        /// Where it was expected
        path: PathBuf,
    },
}
