//! Forward engine events to an async consumer.

use std::sync::atomic::{AtomicU64, Ordering};

use prophet_core::{EngineEvent, EngineListener};
use tokio::sync::mpsc;

/// Listener that forwards events into a bounded channel.
///
/// Sending never waits: when the consumer falls behind, events are dropped
/// and counted instead of stalling workers.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::Sender<EngineEvent>,
    dropped: AtomicU64,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: AtomicU64::new(0) }, rx)
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EngineListener for ChannelListener {
    fn on_event(&self, event: &EngineEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
