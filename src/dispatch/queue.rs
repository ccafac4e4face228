//! Dispatch queue.
//!
//! Unbounded priority queue of task ids. Higher priority pops first; within
//! a priority band entries pop in push order. A re-enqueued task is pushed
//! again, so it lands at the tail of its band.
//!
//! The consumer parks on a [`Notify`] while the queue is empty.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::task::Priority;

#[derive(Debug)]
struct Entry {
    priority: Priority,
    sequence: u64, // FIFO within a band
    task_id: String,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// Priority queue feeding the dispatch worker.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    sequence: AtomicU64,
    notify: Notify,
}

impl DispatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `task_id` at the tail of its priority band.
    pub fn push(&self, priority: Priority, task_id: impl Into<String>) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let task_id = task_id.into();
        let depth = {
            let mut heap = self.heap.lock();
            heap.push(Entry {
                priority,
                sequence,
                task_id: task_id.clone(),
            });
            heap.len()
        };
        crate::metrics::set_queue_depth(depth);
        debug!(task_id = %task_id, ?priority, sequence, queue_size = depth, "task enqueued");
        self.notify.notify_one();
    }

    /// Pop the highest-priority entry without waiting.
    pub fn try_pop(&self) -> Option<(Priority, String)> {
        let (entry, depth) = {
            let mut heap = self.heap.lock();
            let entry = heap.pop()?;
            (entry, heap.len())
        };
        crate::metrics::set_queue_depth(depth);
        debug!(
            task_id = %entry.task_id,
            priority = ?entry.priority,
            sequence = entry.sequence,
            queue_size = depth,
            "task dequeued"
        );
        Some((entry.priority, entry.task_id))
    }

    /// Pop the highest-priority entry, waiting until one is available.
    ///
    /// Cancel-safe: dropping the future never loses an entry.
    pub async fn pop(&self) -> (Priority, String) {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Entries currently queued.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}
