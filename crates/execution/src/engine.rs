//! The batch engine - a pool of workers draining one task queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use prophet_core::{
    artifact_dir, EngineEvent, EngineListener, Listeners, ProgressUpdate, RunId, RunOutcome,
    RunStatus,
};
use prophet_storage::{ResumePlan, StorageError, Summary, SummaryStorage, SummaryStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::budget::BudgetTracker;
use crate::config::EngineConfig;
use crate::executor::{ExecutionRequest, TaskExecutor};
use crate::queue::{QueueError, QueuedTask, TaskQueue};
use crate::rate_limit::RateLimitCoordinator;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::timeout::TimeoutSupervisor;

/// Errors that abort a batch run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The task set failed load-time validation
    #[error("invalid task set: {0}")]
    Queue(#[from] QueueError),

    /// The summary could not be persisted
    #[error("summary storage failed: {0}")]
    Storage(#[from] StorageError),

    /// A worker panicked
    #[error("worker {worker} panicked: {message}")]
    Worker {
        /// Worker index
        worker: usize,
        /// Panic description
        message: String,
    },
}

/// Result of a finished (or interrupted) batch run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identity of this run
    pub run_id: RunId,
    /// Tasks queued in this run
    pub total: usize,
    /// Terminal outcomes recorded in this run
    pub completed: usize,
    /// Budget spent, including carried-over spend
    pub total_cost: f64,
    /// Whether a shutdown request stopped the run early
    pub interrupted: bool,
    /// Whether the global budget ran out
    pub budget_exhausted: bool,
    /// Final summary, prior entries included
    pub summary: Summary,
}

/// Runs a batch of tasks through an executor with `W` concurrent workers.
///
/// Each worker loops:
/// ```text
/// Pop → Budget check → Wait out pause → Budget check → Execute (with timeout) → Retry or Record
/// ```
pub struct BatchEngine {
    config: EngineConfig,
    executor: Arc<dyn TaskExecutor>,
    listeners: Listeners,
}

impl BatchEngine {
    /// Create an engine with default configuration.
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self { config: EngineConfig::default(), executor, listeners: Listeners::new() }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an event listener.
    pub fn with_listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the tasks in `plan`, persisting every terminal outcome to `storage`.
    ///
    /// Cancelling `shutdown` stops new dispatches; attempts already running
    /// finish and are recorded. Tasks never dispatched stay out of the summary
    /// so a later resume picks them up.
    pub async fn run(
        &self,
        plan: ResumePlan,
        storage: Arc<dyn SummaryStorage>,
        shutdown: CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let queue = TaskQueue::new(plan.tasks)?;
        let total = queue.total();
        let run_id = plan.summary.run.as_ref().map(|r| r.run_id).unwrap_or_default();

        let budget = BudgetTracker::new(self.config.max_cost)
            .with_max_cost_per_run(self.config.max_cost_per_run)
            .with_initial_total(plan.summary.total_cost);
        let rate_limit = RateLimitCoordinator::new(self.config.rate_limit_backoff)
            .with_poll_interval(self.config.pause_poll_interval);

        let shared = Arc::new(Shared {
            queue,
            budget,
            rate_limit,
            retry: RetryPolicy::new(self.config.max_attempts, self.config.rate_limit_backoff),
            timeout: TimeoutSupervisor::new(self.config.timeout),
            store: SummaryStore::new(plan.summary, storage),
            executor: self.executor.clone(),
            listeners: self.listeners.clone(),
            config: self.config.clone(),
            stop: shutdown.child_token(),
            started: Instant::now(),
            completed: AtomicUsize::new(0),
            budget_announced: AtomicBool::new(false),
            total,
        });

        let workers = self.config.workers.max(1);
        info!(%run_id, total, workers, skipped = plan.skipped, "starting batch run");
        shared.listeners.emit(EngineEvent::RunStarted { run_id, total, workers });

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let result = worker_loop(shared.clone(), worker).await;
                    if result.is_err() {
                        shared.stop.cancel();
                    }
                    result
                })
            })
            .collect();

        let mut first_error = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(EngineError::Worker { worker, message: e.to_string() }),
            };
            if let Err(e) = result {
                error!(worker, error = %e, "worker failed");
                shared.stop.cancel();
                first_error.get_or_insert(e);
            }
        }

        let flushed = shared.store.flush().await;
        if let Some(e) = first_error {
            return Err(e);
        }
        flushed?;

        let completed = shared.completed.load(Ordering::SeqCst);
        let total_cost = shared.budget.total_spent().await;
        let interrupted = shutdown.is_cancelled() && completed < total;
        let budget_exhausted = shared.budget.is_exhausted().await;

        info!(%run_id, completed, total, total_cost, interrupted, "batch run finished");
        shared.listeners.emit(EngineEvent::RunFinished { completed, total, total_cost, interrupted });

        Ok(RunReport {
            run_id,
            total,
            completed,
            total_cost,
            interrupted,
            budget_exhausted,
            summary: shared.store.snapshot().await,
        })
    }
}

struct Shared {
    queue: TaskQueue,
    budget: BudgetTracker,
    rate_limit: RateLimitCoordinator,
    retry: RetryPolicy,
    timeout: TimeoutSupervisor,
    store: SummaryStore,
    executor: Arc<dyn TaskExecutor>,
    listeners: Listeners,
    config: EngineConfig,
    stop: CancellationToken,
    started: Instant,
    completed: AtomicUsize,
    budget_announced: AtomicBool,
    total: usize,
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) -> Result<(), EngineError> {
    debug!(worker, "worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => None,
            item = shared.queue.next_task() => item,
        };
        let Some(mut item) = next else { break };

        if shared.budget.is_exhausted().await {
            skip_for_budget(&shared, item).await?;
            continue;
        }

        if !shared.rate_limit.wait_if_paused(&shared.stop).await {
            // Interrupted while paused: leave the task unrecorded for resume.
            shared.queue.requeue(item).await;
            break;
        }

        // Other workers may have spent the budget during the pause.
        if shared.budget.is_exhausted().await {
            skip_for_budget(&shared, item).await?;
            continue;
        }

        item.attempts += 1;
        let task_id = item.task.task_id.clone();
        shared.listeners.emit(EngineEvent::TaskStarted { task_id: task_id.clone(), attempt: item.attempts });
        debug!(worker, task_id = %task_id, attempt = item.attempts, "dispatching");

        let cancel = CancellationToken::new();
        let request = ExecutionRequest {
            task: item.task.clone(),
            attempt: item.attempts,
            cost_cap: shared.budget.max_cost_per_run(),
            deadline: shared.timeout.deadline(),
            output_dir: shared.config.output_dir.join(artifact_dir(&task_id)),
            runtime: shared.config.runtime.clone(),
            cancel: cancel.clone(),
        };

        let result = shared.timeout.run(&cancel, shared.executor.execute(request)).await;

        let outcome = match result {
            Ok(Ok(report)) => {
                item.add_cost(report.spent(), report.cost);
                let mut outcome = outcome_for(&item, report.status);
                outcome.submission = report.submission;
                outcome.evaluation = report.evaluation;
                outcome.error_detail = report.error;
                outcome
            }
            Ok(Err(failure)) => {
                item.add_cost(failure.cost_spent, failure.cost);
                match shared.retry.decide(item.attempts, &failure.error) {
                    RetryDecision::Retry { pause } => {
                        let backoff = shared.rate_limit.report_rate_limited(Some(pause)).await;
                        shared.listeners.emit(EngineEvent::Paused { backoff });
                        info!(task_id = %task_id, attempt = item.attempts, error = %failure.error, "transient failure, requeueing");
                        shared.listeners.emit(EngineEvent::TaskRetrying {
                            task_id,
                            attempt: item.attempts,
                            backoff,
                            reason: failure.error.to_string(),
                        });
                        shared.queue.requeue(item).await;
                        continue;
                    }
                    RetryDecision::Terminal { status, detail } => {
                        outcome_for(&item, status).with_error(detail)
                    }
                }
            }
            Err(timed_out) => outcome_for(&item, RunStatus::Timeout).with_error(timed_out.to_string()),
        };

        record(&shared, outcome).await?;
    }
    debug!(worker, "worker exiting");
    Ok(())
}

fn outcome_for(item: &QueuedTask, status: RunStatus) -> RunOutcome {
    let mut outcome = RunOutcome::new(&item.task, status);
    outcome.cost_spent = item.cost_spent;
    outcome.cost = item.cost;
    outcome.attempts = item.attempts;
    outcome
}

async fn skip_for_budget(shared: &Shared, item: QueuedTask) -> Result<(), EngineError> {
    let max_cost = shared.budget.max_cost();
    if !shared.budget_announced.swap(true, Ordering::SeqCst) {
        let total_spent = shared.budget.total_spent().await;
        info!(total_spent, max_cost, "cost limit reached, skipping remaining tasks");
        shared.listeners.emit(EngineEvent::BudgetExhausted { total_spent, max_cost });
    }
    // A task requeued after a failed attempt keeps what it already spent.
    let mut outcome = RunOutcome::skipped_for_budget(&item.task, max_cost);
    outcome.cost_spent = item.cost_spent;
    outcome.cost = item.cost;
    outcome.attempts = item.attempts;
    record(shared, outcome).await
}

/// Account spend, persist the outcome, release the queue slot and report.
async fn record(shared: &Shared, outcome: RunOutcome) -> Result<(), EngineError> {
    let total_cost = shared.budget.record(outcome.cost_spent).await;
    let task_id = outcome.task_id.clone();
    let status = outcome.status.clone();
    let cost_spent = outcome.cost_spent;

    let stored = shared.store.record(outcome, total_cost).await;
    shared.queue.finish().await;
    stored?;

    let completed = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
    info!(task_id = %task_id, status = %status, cost = cost_spent, completed, total = shared.total, "task finished");

    shared.listeners.emit(EngineEvent::TaskCompleted { task_id, status, cost_spent });
    shared.listeners.emit(EngineEvent::Progress(ProgressUpdate {
        completed,
        total: shared.total,
        elapsed: shared.started.elapsed(),
        total_cost,
    }));
    Ok(())
}
