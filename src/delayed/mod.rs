//! The delayed-message queue: a single time-ordered heap driven by one
//! deferred timer.
//!
//! The manager itself stays synchronous and side-effect free — it only
//! tracks which ids are due. The actual timer (`tokio::time::sleep`) and the
//! act of re-routing due messages through the pipeline/router live in the
//! topic's background worker, since fetching metadata from storage and
//! invoking the router are suspension points this module must not perform
//! itself.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Single time-ordered heap of `(readyAt, id)` pairs.
pub struct DelayedQueueManager {
    heap: Mutex<BinaryHeap<Reverse<(i64, u64)>>>,
    is_processing: AtomicBool,
}

impl Default for DelayedQueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayedQueueManager {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            is_processing: AtomicBool::new(false),
        }
    }

    /// Insert a delayed message. Returns `true` if this entry is now the
    /// earliest in the heap, meaning the caller must reschedule its timer
    /// to this entry's `ready_at` rather than wait for the previous one.
    pub fn insert(&self, id: u64, ready_at: i64) -> bool {
        let mut heap = self.heap.lock();
        let was_earliest = heap.peek().map(|Reverse((ts, _))| ready_at < *ts).unwrap_or(true);
        heap.push(Reverse((ready_at, id)));
        was_earliest
    }

    pub fn next_ready_at(&self) -> Option<i64> {
        self.heap.lock().peek().map(|Reverse((ts, _))| *ts)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Pop and return every id whose `readyAt <= now`. Each id can only be
    /// drained once: it is removed from the heap before the caller ever
    /// gets a chance to route it.
    pub fn drain_due(&self, now: i64) -> Vec<u64> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while let Some(Reverse((ts, _))) = heap.peek() {
            if *ts > now {
                break;
            }
            if let Some(Reverse((_, id))) = heap.pop() {
                due.push(id);
            }
        }
        due
    }

    /// Attempt to transition into the processing state. Returns `false`
    /// (no-op) if processing is already underway, matching
    /// `scheduleProcessing`'s guard against re-entrant sweeps.
    pub fn begin_processing(&self) -> bool {
        self.is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_processing(&self) {
        self.is_processing.store(false, Ordering::Release);
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }
}
