//! Progress tracking: aggregate engine events into a queryable snapshot.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use prophet_core::{EngineEvent, EngineListener, TaskId};

use crate::estimator::CompletionEstimator;

/// How many recent task ids each status keeps.
const RECENT_PER_STATUS: usize = 5;

/// Completed tasks sharing one exit status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCount {
    /// Exit status
    pub status: String,
    /// Tasks with this status
    pub count: usize,
    /// Most recent task ids, newest first
    pub recent: Vec<TaskId>,
}

/// A snapshot of progress at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// When snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Tasks queued
    pub total: usize,
    /// Tasks with a terminal status
    pub completed: usize,
    /// Tasks currently executing
    pub running: Vec<TaskId>,
    /// Completed tasks by status, most common first
    pub by_status: Vec<StatusCount>,
    /// Retries scheduled so far
    pub retries: usize,
    /// Budget spent
    pub total_cost: f64,
    /// Time since the run started
    pub elapsed: Duration,
    /// Estimated time to completion
    pub eta: Option<Duration>,
    /// Completed tasks per minute
    pub throughput_per_minute: f64,
    /// Whether the run has finished
    pub finished: bool,
    /// Whether the run stopped early
    pub interrupted: bool,
}

impl ProgressSnapshot {
    /// Tasks with the given status.
    pub fn count(&self, status: &str) -> usize {
        self.by_status.iter().find(|s| s.status == status).map_or(0, |s| s.count)
    }

    /// Percentage of queued tasks completed.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }

    /// Render the exit-status table shown at the end of a run.
    pub fn render_table(&self) -> String {
        let width = self
            .by_status
            .iter()
            .map(|s| s.status.len())
            .chain(std::iter::once("Exit Status".len()))
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {:>5}  Recent runs", "Exit Status", "Count");
        for row in &self.by_status {
            let recent: Vec<&str> = row.recent.iter().map(|id| id.as_str()).collect();
            let _ = writeln!(
                out,
                "{:<width$}  {:>5}  {}",
                row.status,
                row.count,
                shorten(&recent.join(", "), 55)
            );
        }
        out
    }
}

fn shorten(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", head)
}

#[derive(Debug, Default)]
struct StatusBucket {
    count: usize,
    recent: VecDeque<TaskId>,
}

#[derive(Debug)]
struct TrackerState {
    total: usize,
    completed: usize,
    running: BTreeSet<TaskId>,
    by_status: BTreeMap<String, StatusBucket>,
    retries: usize,
    total_cost: f64,
    started: Instant,
    finished: bool,
    interrupted: bool,
}

/// Listener that keeps running totals of an engine run.
///
/// Event handling only touches in-memory counters, so it is safe to call
/// inline from engine workers; [`ProgressTracker::snapshot`] never blocks on I/O.
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    estimator: CompletionEstimator,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                total: 0,
                completed: 0,
                running: BTreeSet::new(),
                by_status: BTreeMap::new(),
                retries: 0,
                total_cost: 0.0,
                started: Instant::now(),
                finished: false,
                interrupted: false,
            }),
            estimator: CompletionEstimator,
        }
    }

    /// Take a progress snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut by_status: Vec<StatusCount> = state
            .by_status
            .iter()
            .map(|(status, bucket)| StatusCount {
                status: status.clone(),
                count: bucket.count,
                recent: bucket.recent.iter().rev().cloned().collect(),
            })
            .collect();
        by_status.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.status.cmp(&b.status)));

        let elapsed = state.started.elapsed();
        ProgressSnapshot {
            timestamp: Utc::now(),
            total: state.total,
            completed: state.completed,
            running: state.running.iter().cloned().collect(),
            by_status,
            retries: state.retries,
            total_cost: state.total_cost,
            elapsed,
            eta: self.estimator.estimate_remaining(state.completed, state.total, elapsed),
            throughput_per_minute: self.estimator.throughput_per_minute(state.completed, elapsed),
            finished: state.finished,
            interrupted: state.interrupted,
        }
    }
}

impl EngineListener for ProgressTracker {
    fn on_event(&self, event: &EngineEvent) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            EngineEvent::RunStarted { total, .. } => {
                state.total = *total;
                state.started = Instant::now();
            }
            EngineEvent::TaskStarted { task_id, .. } => {
                state.running.insert(task_id.clone());
            }
            EngineEvent::TaskRetrying { task_id, .. } => {
                state.running.remove(task_id);
                state.retries += 1;
            }
            EngineEvent::TaskCompleted { task_id, status, .. } => {
                state.running.remove(task_id);
                state.completed += 1;
                let bucket = state.by_status.entry(status.as_str().to_string()).or_default();
                bucket.count += 1;
                bucket.recent.push_back(task_id.clone());
                if bucket.recent.len() > RECENT_PER_STATUS {
                    bucket.recent.pop_front();
                }
            }
            EngineEvent::Progress(update) => {
                state.total_cost = update.total_cost;
            }
            EngineEvent::RunFinished { total_cost, interrupted, .. } => {
                state.total_cost = *total_cost;
                state.finished = true;
                state.interrupted = *interrupted;
            }
            EngineEvent::Paused { .. } | EngineEvent::BudgetExhausted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prophet_core::{ProgressUpdate, RunId, RunStatus};

    fn completed(id: &str, status: RunStatus) -> EngineEvent {
        EngineEvent::TaskCompleted { task_id: id.into(), status, cost_spent: 0.1 }
    }

    #[test]
    fn test_aggregates_by_status() {
        let tracker = ProgressTracker::new();
        tracker.on_event(&EngineEvent::RunStarted { run_id: RunId::new(), total: 4, workers: 2 });
        tracker.on_event(&EngineEvent::TaskStarted { task_id: "a".into(), attempt: 1 });
        tracker.on_event(&EngineEvent::TaskStarted { task_id: "b".into(), attempt: 1 });
        assert_eq!(tracker.snapshot().running.len(), 2);

        tracker.on_event(&completed("a", RunStatus::Submitted));
        tracker.on_event(&completed("b", RunStatus::AuthError));
        tracker.on_event(&completed("c", RunStatus::Submitted));
        tracker.on_event(&EngineEvent::Progress(ProgressUpdate {
            completed: 3,
            total: 4,
            elapsed: Duration::from_secs(3),
            total_cost: 0.3,
        }));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.completed, 3);
        assert!(snapshot.running.is_empty());
        assert_eq!(snapshot.count("submitted"), 2);
        assert_eq!(snapshot.count("auth_error"), 1);
        assert_eq!(snapshot.by_status[0].status, "submitted");
        assert_eq!(snapshot.by_status[0].recent, vec![TaskId::from("c"), TaskId::from("a")]);
        assert!((snapshot.total_cost - 0.3).abs() < 1e-9);
        assert_eq!(snapshot.percent(), 75.0);
        assert!(snapshot.eta.is_some());
        assert!(snapshot.throughput_per_minute > 0.0);
    }

    #[test]
    fn test_recent_ids_are_capped() {
        let tracker = ProgressTracker::new();
        for i in 0..8 {
            tracker.on_event(&completed(&format!("t{}", i), RunStatus::Submitted));
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.count("submitted"), 8);
        assert_eq!(snapshot.by_status[0].recent.len(), RECENT_PER_STATUS);
        assert_eq!(snapshot.by_status[0].recent[0].as_str(), "t7");
    }

    #[test]
    fn test_retry_and_finish() {
        let tracker = ProgressTracker::new();
        tracker.on_event(&EngineEvent::TaskStarted { task_id: "a".into(), attempt: 1 });
        tracker.on_event(&EngineEvent::TaskRetrying {
            task_id: "a".into(),
            attempt: 1,
            backoff: Duration::from_secs(60),
            reason: "429".into(),
        });
        tracker.on_event(&EngineEvent::RunFinished {
            completed: 0,
            total: 1,
            total_cost: 0.0,
            interrupted: true,
        });
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.retries, 1);
        assert!(snapshot.running.is_empty());
        assert!(snapshot.finished && snapshot.interrupted);
    }

    #[test]
    fn test_render_table() {
        let tracker = ProgressTracker::new();
        tracker.on_event(&completed("a", RunStatus::Submitted));
        tracker.on_event(&completed("b", RunStatus::SkippedCostLimit));
        let table = tracker.snapshot().render_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Exit Status"));
        assert!(table.contains("skipped_cost_limit"));
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("abc", 5), "abc");
        assert_eq!(shorten("abcdefgh", 6), "abc...");
    }
}
