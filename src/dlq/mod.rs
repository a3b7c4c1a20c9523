//! The dead-letter queue: entries a topic could not or would not deliver.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::BrokerResult;
use crate::message::{DlqReason, MessageMetadata};
use crate::storage::MessageStorage;

struct ReaderCursor {
    ids: Vec<u64>,
    position: usize,
}

/// A single entry yielded by a DLQ reader.
pub struct DlqEntry {
    pub payload: Vec<u8>,
    pub metadata: MessageMetadata,
    pub reason: DlqReason,
}

/// `id -> reason` registry plus a monotonic processed counter.
///
/// `createReader` is singleton-per-consumer: calling it twice for the same
/// consumer id returns a handle onto the same cursor rather than a fresh
/// snapshot, so two concurrent drainers for one consumer don't double up.
pub struct DLQManager {
    entries: DashMap<u64, DlqReason>,
    total_processed: AtomicU64,
    cursors: DashMap<u64, Arc<Mutex<ReaderCursor>>>,
    storage: Arc<MessageStorage>,
}

impl DLQManager {
    pub fn new(storage: Arc<MessageStorage>) -> Self {
        Self {
            entries: DashMap::new(),
            total_processed: AtomicU64::new(0),
            cursors: DashMap::new(),
            storage,
        }
    }

    pub fn publish(&self, id: u64, reason: DlqReason) {
        self.entries.insert(id, reason);
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_messages_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the shared cursor for `consumer_id`, snapshotting the
    /// current entry set the first time it's requested.
    fn cursor_for(&self, consumer_id: u64) -> Arc<Mutex<ReaderCursor>> {
        self.cursors
            .entry(consumer_id)
            .or_insert_with(|| {
                let ids: Vec<u64> = self.entries.iter().map(|r| *r.key()).collect();
                Arc::new(Mutex::new(ReaderCursor { ids, position: 0 }))
            })
            .clone()
    }

    /// Read the next unread entry for `consumer_id`, skipping ids that are
    /// no longer readable from storage (already flushed/deleted elsewhere).
    pub fn read_next(&self, consumer_id: u64) -> Option<DlqEntry> {
        let cursor = self.cursor_for(consumer_id);
        loop {
            let id = {
                let mut guard = cursor.lock();
                if guard.position >= guard.ids.len() {
                    return None;
                }
                let id = guard.ids[guard.position];
                guard.position += 1;
                id
            };
            let Some(reason) = self.entries.get(&id).map(|r| *r) else {
                continue;
            };
            if let Ok((metadata, payload)) = self.storage.read_message(id) {
                return Some(DlqEntry { payload, metadata, reason });
            }
        }
    }

    /// Drop a consumer's reader cursor so the next `createReader` call
    /// starts a fresh snapshot.
    pub fn reset_reader(&self, consumer_id: u64) {
        self.cursors.remove(&consumer_id);
    }

    pub fn remove(&self, id: u64) {
        self.entries.remove(&id);
    }

    /// Iterate `consumer_id`'s reader; for each entry passing `filter`,
    /// invoke `handler`. Entries the handler completes without error are
    /// removed from the DLQ. Returns the count of successful replays.
    pub async fn replay_messages<F, Fut>(
        &self,
        consumer_id: u64,
        mut filter: impl FnMut(&DlqEntry) -> bool,
        mut handler: F,
    ) -> usize
    where
        F: FnMut(Vec<u8>, MessageMetadata) -> Fut,
        Fut: Future<Output = BrokerResult<()>>,
    {
        let mut successes = 0;
        while let Some(entry) = self.read_next(consumer_id) {
            if !filter(&entry) {
                continue;
            }
            let id = entry.metadata.id;
            if handler(entry.payload, entry.metadata).await.is_ok() {
                self.remove(id);
                successes += 1;
            }
        }
        successes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::MessageMetadataBuilder;
    use crate::storage::MemoryStore;

    fn manager() -> DLQManager {
        let (storage, _rx) = MessageStorage::new(Arc::new(MemoryStore::new()));
        let storage = Arc::new(storage);
        storage.write_all(vec![
            (MessageMetadataBuilder::new(1, 1, "orders", 4).build(), b"a".to_vec()),
            (MessageMetadataBuilder::new(2, 1, "orders", 4).build(), b"b".to_vec()),
        ]);
        DLQManager::new(storage)
    }

    #[test]
    fn publish_increments_total_processed() {
        let dlq = manager();
        dlq.publish(1, DlqReason::Expired);
        dlq.publish(2, DlqReason::MaxAttempts);
        assert_eq!(dlq.total_messages_processed(), 2);
        assert_eq!(dlq.len(), 2);
    }

    #[test]
    fn reader_is_shared_across_repeated_calls_for_same_consumer() {
        let dlq = manager();
        dlq.publish(1, DlqReason::Expired);
        dlq.publish(2, DlqReason::MaxAttempts);

        let first = dlq.read_next(7).expect("first entry");
        // A fresh `read_next` call for the same consumer continues the
        // cursor rather than re-snapshotting, so it returns the other id.
        let second = dlq.read_next(7).expect("second entry");
        assert_ne!(first.metadata.id, second.metadata.id);
        assert!(dlq.read_next(7).is_none());
    }

    #[test]
    fn different_consumers_get_independent_cursors() {
        let dlq = manager();
        dlq.publish(1, DlqReason::Expired);

        assert!(dlq.read_next(1).is_some());
        assert!(dlq.read_next(2).is_some());
    }

    #[test]
    fn read_next_skips_ids_unreadable_from_storage() {
        let dlq = manager();
        dlq.publish(1, DlqReason::Expired);
        dlq.publish(99, DlqReason::Expired); // never written to storage
        dlq.publish(2, DlqReason::Expired);

        let mut seen = Vec::new();
        while let Some(entry) = dlq.read_next(1) {
            seen.push(entry.metadata.id);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn replay_messages_removes_only_successful_entries() {
        let dlq = manager();
        dlq.publish(1, DlqReason::Expired);
        dlq.publish(2, DlqReason::Expired);

        let successes = dlq
            .replay_messages(
                1,
                |_entry| true,
                |_payload, meta| async move {
                    if meta.id == 1 {
                        Ok(())
                    } else {
                        Err(crate::error::BrokerError::internal("boom"))
                    }
                },
            )
            .await;

        assert_eq!(successes, 1);
        assert_eq!(dlq.len(), 1);
        assert!(!dlq.entries.contains_key(&1));
        assert!(dlq.entries.contains_key(&2));
    }
}
