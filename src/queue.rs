//! The work queue: slaves waiting to be processed in this pass.
//!
//! A plain FIFO behind a mutex. Puts and gets never block. The same slave
//! may appear more than once when it is re-enqueued after a graceful.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A slave name waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub name: String,

    /// Insertion order; only used in logs.
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<QueueItem>>,
    next_seq: AtomicU64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a slave to the back of the queue and returns its sequence number.
    pub fn put(&self, name: impl Into<String>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.lock().push_back(QueueItem {
            name: name.into(),
            seq,
        });
        seq
    }

    /// Puts an item that was taken but could not be handled back on the queue.
    pub fn put_back(&self, item: QueueItem) {
        self.lock().push_back(item);
    }

    /// Takes the item at the front of the queue, if any.
    pub fn try_get(&self) -> Option<QueueItem> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Names still queued, front first.
    pub fn pending_names(&self) -> Vec<String> {
        self.lock().iter().map(|item| item.name.clone()).collect()
    }

    // A panicking holder cannot leave the deque half-updated, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
