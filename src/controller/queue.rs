use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Coalescing task queue with a single consumer.
///
/// A key sitting in the queue absorbs further enqueues of the same key, so
/// any number of triggers arriving while a sync is in flight collapse into
/// exactly one subsequent sync. The key leaves the pending set when the
/// consumer dequeues it, which is what makes the next trigger schedule a
/// fresh pass.
pub struct TaskQueue {
    pending: Mutex<HashSet<String>>,
    tx: mpsc::UnboundedSender<String>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    cancel: CancellationToken,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pending: Mutex::new(HashSet::new()),
            tx,
            rx: AsyncMutex::new(rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Schedule `key`. Returns `false` when the key was already pending
    /// (the trigger coalesced) or the queue is shut down.
    pub fn enqueue(&self, key: impl Into<String>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let key = key.into();
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !pending.insert(key.clone()) {
            debug!(key = %key, "Trigger coalesced into pending sync");
            return false;
        }
        drop(pending);
        self.tx.send(key).is_ok()
    }

    /// Wait for the next key. `None` after shutdown.
    pub async fn next(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        let key = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            key = rx.recv() => key?,
        };
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.remove(&key);
        Some(key)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
