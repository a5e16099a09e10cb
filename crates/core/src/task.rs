//! Task model - one forecasting question submitted to the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::TaskId;

/// A task is a single forecasting question with its candidate outcomes.
///
/// The engine never interprets `title`, `outcomes` or `context`; they are
/// carried through to the executor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the task set
    pub task_id: TaskId,

    /// The question being forecast
    pub title: String,

    /// Candidate outcomes, in dataset order (at least two)
    pub outcomes: Vec<String>,

    /// Free-form background for the question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Resolved outcome labels (0/1 per outcome), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<BTreeMap<String, u8>>,

    /// Forecast deadline, normalised to `MM/DD/YYYY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict_by: Option<String>,

    /// Where the question came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Resolution criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,

    /// Anything else the dataset row carried
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Create a task with the required fields only.
    pub fn new(
        task_id: impl Into<TaskId>,
        title: impl Into<String>,
        outcomes: Vec<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            outcomes,
            context: None,
            ground_truth: None,
            predict_by: None,
            source: None,
            criteria: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Check the shape invariants every queued task must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.task_id.is_empty() {
            return Err(ValidationError::MissingField {
                task_id: self.task_id.clone(),
                field: "task_id",
            });
        }
        // The id names the task's artifact directory.
        let id = self.task_id.as_str();
        if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            return Err(ValidationError::UnsafeId(self.task_id.clone()));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField {
                task_id: self.task_id.clone(),
                field: "title",
            });
        }
        let usable = self.outcomes.iter().filter(|o| !o.trim().is_empty()).count();
        if usable < 2 {
            return Err(ValidationError::TooFewOutcomes {
                task_id: self.task_id.clone(),
                found: usable,
            });
        }
        Ok(())
    }
}

/// Load-time validation failures for a task.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is missing or blank
    #[error("task '{task_id}': missing required field '{field}'")]
    MissingField {
        /// Offending task
        task_id: TaskId,
        /// Field name
        field: &'static str,
    },

    /// Fewer than two usable outcomes
    #[error("task '{task_id}': outcomes must contain at least 2 non-empty strings (found {found})")]
    TooFewOutcomes {
        /// Offending task
        task_id: TaskId,
        /// Number of non-empty outcomes
        found: usize,
    },

    /// Two tasks share an id
    #[error("duplicate task_id '{0}'")]
    DuplicateId(TaskId),

    /// The id cannot be used as a directory name
    #[error("task_id '{0}' must not contain path separators or be '.' or '..'")]
    UnsafeId(TaskId),
}
