//! Progress reporting for batch runs.
//!
//! Listeners that turn engine events into a live snapshot, throttled log
//! lines, or a channel feed for async consumers.

#![warn(missing_docs)]

pub mod tracker;
pub mod estimator;
pub mod reporter;
pub mod channel;

pub use tracker::{ProgressSnapshot, ProgressTracker, StatusCount};
pub use estimator::CompletionEstimator;
pub use reporter::{format_progress, LogReporter, DEFAULT_REPORT_INTERVAL};
pub use channel::ChannelListener;
