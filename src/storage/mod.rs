//! Buffered, write-through message storage.
//!
//! Payload bytes and wire-encoded metadata are kept in an in-memory
//! [`DashMap`] for lock-free reads, while a background worker periodically
//! flushes dirty entries to a [`PersistentStore`]. This mirrors the
//! lock-free registry pattern used elsewhere in the broker: readers never
//! block on the flush path, and the flush path never blocks a publish.

mod memory_store;
mod persistent;

pub use memory_store::MemoryStore;
pub use persistent::PersistentStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use crate::codec::{IdentityPayloadCodec, MetaField, MetadataCodec, PayloadCodec, WireMetadataCodec};
use crate::error::{BrokerError, BrokerResult};
use crate::message::MessageMetadata;

struct Entry {
    metadata_bytes: Vec<u8>,
    payload_bytes: Vec<u8>,
}

/// Write-through store for message payload + metadata pairs.
///
/// Every call mutates the in-memory map immediately and marks the id dirty;
/// [`MessageStorage::flush`] drains the dirty set into the [`PersistentStore`]
/// and is invoked by the topic's flush worker on `persist_threshold_ms`.
pub struct MessageStorage {
    entries: DashMap<u64, Entry>,
    dirty: DashSet<u64>,
    tombstones: DashSet<u64>,
    metadata_codec: Arc<dyn MetadataCodec>,
    payload_codec: Arc<dyn PayloadCodec>,
    persistent: Arc<dyn PersistentStore>,
    total_bytes: AtomicU64,
    error_tx: mpsc::UnboundedSender<BrokerError>,
}

impl MessageStorage {
    pub fn new(persistent: Arc<dyn PersistentStore>) -> (Self, mpsc::UnboundedReceiver<BrokerError>) {
        Self::with_codecs(persistent, Arc::new(WireMetadataCodec), Arc::new(IdentityPayloadCodec))
    }

    pub fn with_codecs(
        persistent: Arc<dyn PersistentStore>,
        metadata_codec: Arc<dyn MetadataCodec>,
        payload_codec: Arc<dyn PayloadCodec>,
    ) -> (Self, mpsc::UnboundedReceiver<BrokerError>) {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let storage = Self {
            entries: DashMap::new(),
            dirty: DashSet::new(),
            tombstones: DashSet::new(),
            metadata_codec,
            payload_codec,
            persistent,
            total_bytes: AtomicU64::new(0),
            error_tx,
        };
        (storage, error_rx)
    }

    /// Cumulative byte admission counter. Per the open question resolved in
    /// the design notes, this never decrements on consume or delete — it is
    /// a lifetime admission cap, not a live-size gauge.
    pub fn total_bytes_admitted(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Write a batch of (metadata, payload) pairs atomically from the
    /// caller's point of view: each entry is independently encoded, and an
    /// encode failure for one id does not block the others.
    pub fn write_all(&self, messages: Vec<(MessageMetadata, Vec<u8>)>) -> Vec<(u64, BrokerResult<()>)> {
        messages
            .into_iter()
            .map(|(meta, payload)| {
                let id = meta.id;
                let result = self.write_one(meta, payload);
                (id, result)
            })
            .collect()
    }

    fn write_one(&self, meta: MessageMetadata, payload: Vec<u8>) -> BrokerResult<()> {
        let metadata_bytes = self.metadata_codec.encode(&meta)?;
        let payload_bytes = self.payload_codec.encode(&payload)?;
        self.total_bytes
            .fetch_add(payload_bytes.len() as u64, Ordering::Relaxed);
        self.entries.insert(
            meta.id,
            Entry {
                metadata_bytes,
                payload_bytes,
            },
        );
        self.tombstones.remove(&meta.id);
        self.dirty.insert(meta.id);
        Ok(())
    }

    pub fn read_message(&self, id: u64) -> BrokerResult<(MessageMetadata, Vec<u8>)> {
        let entry = self
            .entries
            .get(&id)
            .ok_or_else(|| BrokerError::not_found(format!("message {id}")))?;
        let meta = self.metadata_codec.decode(&entry.metadata_bytes)?;
        let payload = self.payload_codec.decode(&entry.payload_bytes)?;
        Ok((meta, payload))
    }

    pub fn read_all(&self, ids: &[u64]) -> Vec<BrokerResult<(MessageMetadata, Vec<u8>)>> {
        ids.iter().map(|id| self.read_message(*id)).collect()
    }

    /// Partial metadata decode for the fields the caller names, skipping
    /// the payload entirely.
    pub fn read_metadata(&self, id: u64, fields: &[MetaField]) -> BrokerResult<MessageMetadata> {
        let entry = self
            .entries
            .get(&id)
            .ok_or_else(|| BrokerError::not_found(format!("message {id}")))?;
        self.metadata_codec.decode_partial(&entry.metadata_bytes, fields)
    }

    pub fn update_metadata(
        &self,
        id: u64,
        patch: impl FnOnce(&mut MessageMetadata),
    ) -> BrokerResult<()> {
        let mut entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found(format!("message {id}")))?;
        let mut meta = self.metadata_codec.decode(&entry.metadata_bytes)?;
        patch(&mut meta);
        entry.metadata_bytes = self.metadata_codec.encode(&meta)?;
        drop(entry);
        self.dirty.insert(id);
        Ok(())
    }

    /// Remove an entry from the live map and mark it for deletion on the
    /// next flush.
    pub fn delete(&self, id: u64) {
        self.entries.remove(&id);
        self.dirty.remove(&id);
        self.tombstones.insert(id);
    }

    /// Drain at most `chunk_size` dirty entries and `chunk_size` tombstones
    /// into the persistent store, to bound a single call's latency. Per-id
    /// failures are reported on the error channel rather than aborting the
    /// rest of the batch, and the id is left dirty/tombstoned so the next
    /// call retries it. Returns `true` if either set still has entries left
    /// after this drain, so the flush worker can reschedule immediately
    /// instead of waiting a full tick.
    pub async fn flush(&self, chunk_size: usize) -> bool {
        let dirty_ids: Vec<u64> = self.dirty.iter().take(chunk_size).map(|r| *r).collect();
        for id in dirty_ids {
            let Some(entry) = self.entries.get(&id) else {
                self.dirty.remove(&id);
                continue;
            };
            let bytes = encode_record(&entry.metadata_bytes, &entry.payload_bytes);
            drop(entry);
            match self.persistent.put(id, bytes).await {
                Ok(()) => {
                    self.dirty.remove(&id);
                }
                Err(err) => {
                    let _ = self.error_tx.send(BrokerError::storage_failure("flush", err.to_string()));
                }
            }
        }

        let tombstoned_ids: Vec<u64> = self.tombstones.iter().take(chunk_size).map(|r| *r).collect();
        for id in tombstoned_ids {
            match self.persistent.delete(id).await {
                Ok(()) => {
                    self.tombstones.remove(&id);
                }
                Err(err) => {
                    let _ = self.error_tx.send(BrokerError::storage_failure("flush_delete", err.to_string()));
                }
            }
        }

        !self.dirty.is_empty() || !self.tombstones.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn encode_record(metadata_bytes: &[u8], payload_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + metadata_bytes.len() + payload_bytes.len());
    out.extend_from_slice(&(metadata_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(metadata_bytes);
    out.extend_from_slice(&(payload_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(payload_bytes);
    out
}
