//! Per-consumer priority queues.
//!
//! Each consumer owns one binary heap keyed on `priority` (higher first),
//! with ties broken by insertion order so a priority class stays FIFO. Only
//! the message id is stored here; payload and metadata live in
//! [`crate::storage::MessageStorage`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Eq, PartialEq)]
struct QueuedId {
    priority: u8,
    sequence: u64,
    id: u64,
}

impl Ord for QueuedId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on priority; lower `sequence` (enqueued earlier) wins
        // ties, so reverse the sequence comparison.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Owns one priority queue per live consumer.
pub struct QueueManager {
    queues: DashMap<u64, Mutex<BinaryHeap<QueuedId>>>,
    sequence: AtomicU64,
    total_queued: AtomicU64,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            sequence: AtomicU64::new(0),
            total_queued: AtomicU64::new(0),
        }
    }

    pub fn add_consumer_queue(&self, consumer_id: u64) {
        self.queues.entry(consumer_id).or_insert_with(|| Mutex::new(BinaryHeap::new()));
    }

    /// Removes the queue, returning the count of messages it held so the
    /// caller can account for them (e.g. re-route or drop from
    /// `totalQueuedMessages`).
    pub fn remove_consumer_queue(&self, consumer_id: u64) -> usize {
        match self.queues.remove(&consumer_id) {
            Some((_, heap)) => {
                let count = heap.lock().len();
                self.total_queued.fetch_sub(count as u64, AtomicOrdering::Relaxed);
                count
            }
            None => 0,
        }
    }

    pub fn enqueue(&self, consumer_id: u64, id: u64, priority: Option<u8>) -> BrokerResult<()> {
        let entry = self
            .queues
            .get(&consumer_id)
            .ok_or_else(|| BrokerError::not_found(format!("consumer queue {consumer_id}")))?;
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        entry.lock().push(QueuedId {
            priority: priority.unwrap_or(0),
            sequence,
            id,
        });
        self.total_queued.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    pub fn dequeue(&self, consumer_id: u64) -> Option<u64> {
        let entry = self.queues.get(&consumer_id)?;
        let popped = entry.lock().pop().map(|q| q.id);
        if popped.is_some() {
            self.total_queued.fetch_sub(1, AtomicOrdering::Relaxed);
        }
        popped
    }

    /// Remove one id from every consumer queue it may be sitting in. A
    /// fanned-out message can be queued to several consumers at once, and
    /// the expiry sweep discovers an overdue id independently of any
    /// consumer's own dequeue, so it has no single queue to target. Returns
    /// how many queues it was found and removed from.
    pub fn remove_id(&self, id: u64) -> usize {
        let mut removed = 0;
        for entry in self.queues.iter() {
            let mut heap = entry.value().lock();
            if heap.is_empty() {
                continue;
            }
            let before = heap.len();
            let retained: BinaryHeap<QueuedId> = std::mem::take(&mut *heap).into_iter().filter(|q| q.id != id).collect();
            *heap = retained;
            removed += before - heap.len();
        }
        if removed > 0 {
            self.total_queued.fetch_sub(removed as u64, AtomicOrdering::Relaxed);
        }
        removed
    }

    pub fn total_queued_messages(&self) -> u64 {
        self.total_queued.load(AtomicOrdering::Relaxed)
    }

    pub fn queue_len(&self, consumer_id: u64) -> usize {
        self.queues.get(&consumer_id).map(|q| q.lock().len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_returns_highest_priority_first() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.enqueue(1, 100, Some(1)).unwrap();
        qm.enqueue(1, 200, Some(5)).unwrap();
        qm.enqueue(1, 300, Some(3)).unwrap();

        assert_eq!(qm.dequeue(1), Some(200));
        assert_eq!(qm.dequeue(1), Some(300));
        assert_eq!(qm.dequeue(1), Some(100));
        assert_eq!(qm.dequeue(1), None);
    }

    #[test]
    fn equal_priority_preserves_fifo_order() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.enqueue(1, 10, Some(2)).unwrap();
        qm.enqueue(1, 20, Some(2)).unwrap();
        qm.enqueue(1, 30, Some(2)).unwrap();

        assert_eq!(qm.dequeue(1), Some(10));
        assert_eq!(qm.dequeue(1), Some(20));
        assert_eq!(qm.dequeue(1), Some(30));
    }

    #[test]
    fn missing_priority_defaults_to_zero() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.enqueue(1, 10, None).unwrap();
        qm.enqueue(1, 20, Some(1)).unwrap();

        assert_eq!(qm.dequeue(1), Some(20));
        assert_eq!(qm.dequeue(1), Some(10));
    }

    #[test]
    fn enqueue_to_unknown_consumer_is_not_found() {
        let qm = QueueManager::new();
        assert!(qm.enqueue(99, 1, None).is_err());
    }

    #[test]
    fn total_queued_messages_tracks_across_consumers() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.add_consumer_queue(2);
        qm.enqueue(1, 10, None).unwrap();
        qm.enqueue(2, 20, None).unwrap();
        assert_eq!(qm.total_queued_messages(), 2);

        qm.dequeue(1);
        assert_eq!(qm.total_queued_messages(), 1);
    }

    #[test]
    fn remove_id_clears_a_fanned_out_message_from_every_consumer_queue() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.add_consumer_queue(2);
        qm.add_consumer_queue(3);
        qm.enqueue(1, 99, None).unwrap();
        qm.enqueue(2, 99, None).unwrap();
        qm.enqueue(3, 100, None).unwrap();

        let removed = qm.remove_id(99);
        assert_eq!(removed, 2);
        assert_eq!(qm.queue_len(1), 0);
        assert_eq!(qm.queue_len(2), 0);
        assert_eq!(qm.queue_len(3), 1);
        assert_eq!(qm.total_queued_messages(), 1);
    }

    #[test]
    fn remove_id_is_a_no_op_when_the_id_is_already_gone() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.enqueue(1, 10, None).unwrap();

        assert_eq!(qm.remove_id(999), 0);
        assert_eq!(qm.total_queued_messages(), 1);
    }

    #[test]
    fn remove_consumer_queue_drains_count_from_total() {
        let qm = QueueManager::new();
        qm.add_consumer_queue(1);
        qm.enqueue(1, 10, None).unwrap();
        qm.enqueue(1, 20, None).unwrap();

        let removed = qm.remove_consumer_queue(1);
        assert_eq!(removed, 2);
        assert_eq!(qm.total_queued_messages(), 0);
    }
}
