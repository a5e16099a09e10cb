//! Execution layer - task queue, budget, rate limiting, retries, timeouts,
//! and the worker pool that ties them together.

#![warn(missing_docs)]

pub mod queue;
pub mod budget;
pub mod rate_limit;
pub mod retry;
pub mod timeout;
pub mod config;
pub mod executor;
pub mod command;
pub mod listener;
pub mod engine;

pub use queue::{QueueError, QueuedTask, TaskQueue};
pub use budget::BudgetTracker;
pub use rate_limit::RateLimitCoordinator;
pub use retry::{ExecutionError, ExecutionFailure, RetryDecision, RetryPolicy};
pub use timeout::{TimedOut, TimeoutSupervisor};
pub use config::{EngineConfig, RuntimeOptions};
pub use executor::{ExecutionReport, ExecutionRequest, TaskExecutor};
pub use command::CommandExecutor;
pub use listener::TracingListener;
pub use engine::{BatchEngine, EngineError, RunReport};
