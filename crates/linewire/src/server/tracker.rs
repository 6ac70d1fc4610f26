//! Tracks spawned tasks so their owner can wait for all of them to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Counts live tasks; [`wait`](Self::wait) resolves once every guard is gone.
///
/// Each guard holds a sender clone that never sends. When the tracker drops
/// its own sender and the last guard is dropped, the receiver observes the
/// channel closing.
#[derive(Debug)]
pub struct TaskTracker {
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
    active: Arc<AtomicUsize>,
}

impl TaskTracker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Record a new task. The task is live until the guard is dropped.
    pub fn track(&self) -> TaskGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            _tx: self.tx.clone(),
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for every tracked task to finish. Nothing is cancelled.
    pub async fn wait(self) {
        let TaskTracker { tx, mut rx, .. } = self;
        drop(tx);
        let _ = rx.recv().await;
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one tracked task alive.
#[derive(Debug)]
pub struct TaskGuard {
    _tx: mpsc::Sender<()>,
    active: Arc<AtomicUsize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
