//! Engine events - what observers (CLI, logger, tests) get to see.

use std::sync::Arc;
use std::time::Duration;

use crate::id::{RunId, TaskId};
use crate::outcome::RunStatus;

/// Aggregate progress after a task reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Terminal outcomes recorded so far in this run
    pub completed: usize,
    /// Tasks queued for this run
    pub total: usize,
    /// Wall-clock time since the run started
    pub elapsed: Duration,
    /// Budget spent, including spend carried over from a resumed summary
    pub total_cost: f64,
}

/// An event emitted by the batch engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Workers are about to start pulling tasks
    RunStarted {
        /// Identity of this run
        run_id: RunId,
        /// Tasks queued
        total: usize,
        /// Worker count
        workers: usize,
    },

    /// A worker dispatched a task to the executor
    TaskStarted {
        /// Task dispatched
        task_id: TaskId,
        /// 1-based attempt number
        attempt: u32,
    },

    /// A transient failure sent the task to the back of the queue
    TaskRetrying {
        /// Task requeued
        task_id: TaskId,
        /// Attempt that failed
        attempt: u32,
        /// Pause requested from the coordinator
        backoff: Duration,
        /// Failure message
        reason: String,
    },

    /// A task reached its terminal status
    TaskCompleted {
        /// Finished task
        task_id: TaskId,
        /// Terminal status
        status: RunStatus,
        /// Spend across all attempts
        cost_spent: f64,
    },

    /// All workers are paused because of upstream rate limiting
    Paused {
        /// Length of the pause from now
        backoff: Duration,
    },

    /// The global budget is spent; no more tasks will start
    BudgetExhausted {
        /// Spend so far
        total_spent: f64,
        /// Configured ceiling
        max_cost: f64,
    },

    /// Progress counters changed
    Progress(ProgressUpdate),

    /// Every worker has exited
    RunFinished {
        /// Terminal outcomes recorded in this run
        completed: usize,
        /// Tasks queued
        total: usize,
        /// Budget spent
        total_cost: f64,
        /// Whether the run stopped early because of a shutdown request
        interrupted: bool,
    },
}

/// Observer of engine events.
///
/// Implementations are called inline on worker tasks and must return quickly:
/// no I/O waits, no unbounded locking.
pub trait EngineListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &EngineEvent);
}

/// Fan-out to a list of listeners.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Vec<Arc<dyn EngineListener>>,
}

impl Listeners {
    /// Create an empty listener list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn with(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.inner.push(listener);
        self
    }

    /// Add a listener in place.
    pub fn push(&mut self, listener: Arc<dyn EngineListener>) {
        self.inner.push(listener);
    }

    /// Deliver an event to every listener, in registration order.
    pub fn emit(&self, event: EngineEvent) {
        for listener in &self.inner {
            listener.on_event(&event);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("count", &self.inner.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EngineEvent>>);

    impl EngineListener for Recorder {
        fn on_event(&self, event: &EngineEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_listeners_fan_out() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let listeners = Listeners::new().with(a.clone()).with(b.clone());

        listeners.emit(EngineEvent::Paused { backoff: Duration::from_secs(5) });

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }
}
