//! Prophet core data models.
//!
//! This crate defines the data structures shared by the batch evaluation
//! engine: tasks, terminal outcomes, and the events observers receive.

#![warn(missing_docs)]

// Identities
mod id;

// Work items and results
mod task;
mod outcome;
mod event;

// Re-exports
pub use id::*;

pub use task::{Task, ValidationError};
pub use outcome::{artifact_dir, CostBreakdown, RunOutcome, RunStatus};
pub use event::{EngineEvent, EngineListener, Listeners, ProgressUpdate};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
