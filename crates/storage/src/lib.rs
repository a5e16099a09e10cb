//! Summary persistence for Prophet batch evaluation.
//!
//! This crate provides a trait-based summary storage interface with a JSON
//! file backend (`summary.json`) and an in-memory backend, the incremental
//! recorder engine workers write through, and resume planning.

#![warn(missing_docs)]

pub mod trait_;
pub mod summary;
pub mod json_storage;
pub mod memory;
pub mod store;
pub mod resume;

pub use trait_::{Result, StorageError, SummaryStorage};
pub use summary::{RunMetadata, Summary};
pub use json_storage::{JsonSummaryStorage, SUMMARY_FILE};
pub use memory::MemorySummaryStorage;
pub use store::SummaryStore;
pub use resume::{ResumeError, ResumePlan};
