//! Dataset loading for Prophet batch evaluation.
//!
//! Parses JSONL task files into validated [`prophet_core::Task`]s and resolves
//! named dataset references against a registry and a local cache.

#![warn(missing_docs)]

pub mod error;
pub mod schema;
pub mod loader;
pub mod reference;
pub mod registry;

pub use error::{DatasetError, Result, SchemaError};
pub use schema::{parse_date, to_mm_dd_yyyy, TaskRow};
pub use loader::{load_tasks, parse_tasks};
pub use reference::DatasetRef;
pub use registry::{
    resolve_latest_version, DatasetCache, DatasetSourceKind, Registry, RegistryEntry,
    ResolvedDataset,
};
