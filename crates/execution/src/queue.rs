//! Shared FIFO of tasks awaiting dispatch.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use prophet_core::{CostBreakdown, Task, ValidationError};
use tokio::sync::{Mutex, Notify};

/// Errors building a queue.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    /// A task failed load-time validation
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A task together with the executor attempts already spent on it.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// The task
    pub task: Arc<Task>,
    /// Attempts made so far
    pub attempts: u32,
    /// Spend of earlier failed attempts
    pub cost_spent: f64,
    /// Breakdown of `cost_spent`, when attempts reported one
    pub cost: Option<CostBreakdown>,
}

impl QueuedTask {
    /// A task that has not been attempted.
    pub fn new(task: Task) -> Self {
        Self { task: Arc::new(task), attempts: 0, cost_spent: 0.0, cost: None }
    }

    /// Fold one attempt's spend into the running totals.
    pub fn add_cost(&mut self, cost_spent: f64, cost: Option<CostBreakdown>) {
        if cost_spent.is_finite() && cost_spent > 0.0 {
            self.cost_spent += cost_spent;
        }
        if let Some(cost) = cost {
            self.cost = Some(self.cost.unwrap_or_default().add(cost));
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedTask>,
    in_flight: usize,
}

/// FIFO queue shared by all workers.
///
/// A popped task counts as in flight until the worker either requeues it or
/// calls [`TaskQueue::finish`]. While anything is in flight an empty queue is
/// not yet drained, because a retry may still arrive at the back.
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    total: usize,
}

impl TaskQueue {
    /// Build a queue, validating every task and rejecting duplicate ids.
    pub fn new(tasks: Vec<Task>) -> Result<Self, QueueError> {
        let mut seen = HashSet::new();
        let mut pending = VecDeque::with_capacity(tasks.len());
        for task in tasks {
            task.validate()?;
            if !seen.insert(task.task_id.clone()) {
                return Err(ValidationError::DuplicateId(task.task_id).into());
            }
            pending.push_back(QueuedTask::new(task));
        }

        let total = pending.len();
        Ok(Self {
            state: Mutex::new(QueueState { pending, in_flight: 0 }),
            notify: Notify::new(),
            total,
        })
    }

    /// Pop the next task without waiting.
    pub async fn pop_next(&self) -> Option<QueuedTask> {
        let mut state = self.state.lock().await;
        let item = state.pending.pop_front()?;
        state.in_flight += 1;
        Some(item)
    }

    /// Pop the next task, waiting for in-flight retries when the queue is
    /// momentarily empty. Returns `None` once the queue is drained.
    pub async fn next_task(&self) -> Option<QueuedTask> {
        loop {
            let notified = {
                let mut state = self.state.lock().await;
                if let Some(item) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(item);
                }
                if state.in_flight == 0 {
                    return None;
                }
                self.notify.notified()
            };
            notified.await;
        }
    }

    /// Put an in-flight task at the back of the queue for another attempt.
    pub async fn requeue(&self, item: QueuedTask) {
        let mut state = self.state.lock().await;
        state.pending.push_back(item);
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Mark an in-flight task as done with the queue.
    pub async fn finish(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Tasks waiting for dispatch.
    pub async fn remaining_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Tasks the queue was built with.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(id: &str) -> Task {
        Task::new(id, "Q", vec!["Y".into(), "N".into()])
    }

    fn ids(items: &[QueuedTask]) -> Vec<&str> {
        items.iter().map(|i| i.task.task_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fifo_with_requeue_at_back() {
        let queue = TaskQueue::new(vec![task("a"), task("b"), task("c")]).unwrap();

        let mut a = queue.pop_next().await.unwrap();
        a.attempts += 1;
        queue.requeue(a).await;

        let mut order = Vec::new();
        while let Some(item) = queue.pop_next().await {
            order.push(item);
            queue.finish().await;
        }
        assert_eq!(ids(&order), vec!["b", "c", "a"]);
        assert_eq!(order[2].attempts, 1);
    }

    #[test]
    fn test_add_cost_accumulates() {
        let mut item = QueuedTask::new(task("a"));
        item.add_cost(0.25, None);
        item.add_cost(0.5, Some(CostBreakdown { model: 0.4, search: 0.1, total: 0.5 }));
        assert!((item.cost_spent - 0.75).abs() < 1e-9);
        assert_eq!(item.cost.unwrap().model, 0.4);
    }

    #[tokio::test]
    async fn test_rejects_duplicates_and_invalid_tasks() {
        let err = TaskQueue::new(vec![task("a"), task("a")]).unwrap_err();
        assert_eq!(err, QueueError::Invalid(ValidationError::DuplicateId("a".into())));

        let bad = Task::new("b", "Q", vec!["only".into()]);
        assert!(TaskQueue::new(vec![bad]).is_err());

        let err = TaskQueue::new(vec![task("ok"), task("../escape")]).unwrap_err();
        assert_eq!(err, QueueError::Invalid(ValidationError::UnsafeId("../escape".into())));
    }

    #[tokio::test]
    async fn test_empty_queue_drains_immediately() {
        let queue = TaskQueue::new(vec![]).unwrap();
        assert!(queue.next_task().await.is_none());
        assert_eq!(queue.total(), 0);
    }

    #[tokio::test]
    async fn test_next_task_waits_for_in_flight_retry() {
        let queue = Arc::new(TaskQueue::new(vec![task("a")]).unwrap());
        let held = queue.next_task().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_task().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.requeue(held).await;
        let again = waiter.await.unwrap().unwrap();
        assert_eq!(again.task.task_id.as_str(), "a");

        queue.finish().await;
        assert!(queue.next_task().await.is_none());
    }

    #[tokio::test]
    async fn test_waiters_release_when_last_task_finishes() {
        let queue = Arc::new(TaskQueue::new(vec![task("a")]).unwrap());
        let _held = queue.next_task().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_task().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.finish().await;
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remaining_count_tracks_pending() {
        let queue = TaskQueue::new(vec![task("a"), task("b")]).unwrap();
        assert_eq!(queue.remaining_count().await, 2);
        let a = queue.pop_next().await.unwrap();
        assert_eq!(queue.remaining_count().await, 1);
        queue.requeue(a).await;
        assert_eq!(queue.remaining_count().await, 2);
    }
}
