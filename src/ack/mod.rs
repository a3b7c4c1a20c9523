//! Pending-delivery tracking, awaited-ack fan-out counting, and ack-timeout
//! sweeping.
//!
//! `ack`/`nack` only perform the bookkeeping this subsystem owns: releasing
//! pending state, mutating `attempts`/`consumedAt` in storage, and reporting
//! which ids need the caller to re-run the pipeline and re-enqueue. Running
//! the pipeline and touching the router/queue manager is left to the topic
//! façade, matching how routing decisions and pipeline outcomes are kept
//! side-effect free elsewhere in this crate.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::BrokerResult;
use crate::message::{DeliveryAttempts, MessageMetadata};
use crate::storage::MessageStorage;

/// An id released by `ack`/`nack`/a timeout sweep, paired with its consumer
/// and (for nacks) whether it should be re-run through the pipeline/router.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasedDelivery {
    pub consumer_id: u64,
    pub message_id: u64,
    pub metadata: Option<MessageMetadata>,
}

pub struct AckManager {
    pending: DashMap<u64, DashMap<u64, i64>>,
    awaited: DashMap<u64, u32>,
    storage: Arc<MessageStorage>,
}

impl AckManager {
    pub fn new(storage: Arc<MessageStorage>) -> Self {
        Self {
            pending: DashMap::new(),
            awaited: DashMap::new(),
            storage,
        }
    }

    pub fn set_awaited_acks_count(&self, id: u64, n: u32) {
        self.awaited.insert(id, n);
    }

    /// Add one back to the awaited-ack count for `id`, inserting it at `1`
    /// if absent. Used when a nack re-enqueues a redelivery that will need
    /// its own ack, undoing the decrement the nack's internal `ack` call
    /// already applied.
    pub fn increment_awaited_acks(&self, id: u64) {
        self.awaited.entry(id).and_modify(|n| *n += 1).or_insert(1);
    }

    /// Remove any outstanding awaited-ack count for `id` entirely and report
    /// what it was (`0` if it had none left). Used when a message is
    /// dead-lettered and will never be acked through the normal path; the
    /// removal itself is the atomic gate that lets two independent callers
    /// (a consumer's own dequeue and the expiry sweep) race on the same id
    /// without double-counting — only the one that actually finds and
    /// removes a nonzero entry proceeds.
    pub fn clear_awaited_acks(&self, id: u64) -> u32 {
        self.awaited.remove(&id).map(|(_, n)| n).unwrap_or(0)
    }

    pub fn add_pending(&self, consumer_id: u64, id: u64, consumed_at: i64) {
        self.pending
            .entry(consumer_id)
            .or_default()
            .insert(id, consumed_at);
    }

    /// Decrement the awaited-ack count for `id`. Once it reaches zero, marks
    /// `consumedAt` in storage and returns `true` so the caller can record
    /// the dequeue latency metric.
    pub fn decrement_awaited_acks(&self, id: u64, now: i64) -> BrokerResult<bool> {
        let reached_zero = match self.awaited.get_mut(&id) {
            Some(mut remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if reached_zero {
            self.awaited.remove(&id);
            self.storage.update_metadata(id, |meta| meta.consumed_at = Some(now))?;
        }
        Ok(reached_zero)
    }

    /// Release one (or, if `id` is `None`, every) pending delivery for
    /// `consumer_id`, decrementing each affected message's awaited-ack
    /// count. Returns the released ids.
    ///
    /// Each id's removal from `consumer_pending` and its awaited-ack
    /// decrement happen as a single step per id, with no intervening lookup
    /// a concurrent caller could also observe — two callers racing to ack
    /// the same id (e.g. a user's explicit ack against the timeout sweep's
    /// internal nack) can only ever have one of them actually remove the
    /// entry, so the awaited count is decremented at most once per id.
    pub fn ack(&self, consumer_id: u64, id: Option<u64>, now: i64) -> BrokerResult<Vec<u64>> {
        let released = self.release_pending(consumer_id, id);
        for &id in &released {
            self.decrement_awaited_acks(id, now)?;
        }
        Ok(released)
    }

    /// Same as `ack`, but also reports whether each released id reached
    /// zero awaited acks, so the topic façade knows which ones to record a
    /// dequeue-latency metric for.
    pub fn ack_with_completions(
        &self,
        consumer_id: u64,
        id: Option<u64>,
        now: i64,
    ) -> BrokerResult<Vec<(u64, bool)>> {
        let released = self.release_pending(consumer_id, id);
        let mut out = Vec::with_capacity(released.len());
        for id in released {
            let completed = self.decrement_awaited_acks(id, now)?;
            out.push((id, completed));
        }
        Ok(out)
    }

    /// Atomically remove one (or every) pending entry for `consumer_id` from
    /// `pending`, returning the ids actually removed. Each candidate id's
    /// removal is a single `remove` call rather than a `get` followed by a
    /// separate `remove`, so a concurrent caller targeting the same id
    /// cannot observe it as still-present after this caller has already
    /// claimed it.
    fn release_pending(&self, consumer_id: u64, id: Option<u64>) -> Vec<u64> {
        let Some(consumer_pending) = self.pending.get(&consumer_id) else {
            return Vec::new();
        };
        match id {
            Some(id) => consumer_pending.remove(&id).map(|_| vec![id]).unwrap_or_default(),
            None => {
                let keys: Vec<u64> = consumer_pending.iter().map(|r| *r.key()).collect();
                keys.into_iter().filter(|key| consumer_pending.remove(key).is_some()).collect()
            }
        }
    }

    /// `ack` to release pending state, then for each released id set
    /// `attempts = requeue ? attempts+1 : NoRequeue` and clear `consumedAt`.
    /// Returns each id's post-nack metadata so the caller can run the
    /// pipeline and, if not diverted, re-enqueue to `consumer_id`'s queue.
    pub fn nack(
        &self,
        consumer_id: u64,
        id: Option<u64>,
        requeue: bool,
        now: i64,
    ) -> BrokerResult<Vec<ReleasedDelivery>> {
        let released_ids = self.ack(consumer_id, id, now)?;
        let mut out = Vec::with_capacity(released_ids.len());
        for message_id in released_ids {
            self.storage.update_metadata(message_id, |meta| {
                meta.attempts = if requeue {
                    meta.attempts.incremented()
                } else {
                    DeliveryAttempts::NoRequeue
                };
                meta.consumed_at = None;
            })?;
            let metadata = self.storage.read_message(message_id).ok().map(|(meta, _)| meta);
            out.push(ReleasedDelivery {
                consumer_id,
                message_id,
                metadata,
            });
        }
        Ok(out)
    }

    /// Find every pending delivery whose `now - consumedAt > ack_timeout_ms`
    /// and nack it with `requeue=true`.
    pub fn sweep_timeouts(&self, now: i64, ack_timeout_ms: u64) -> BrokerResult<Vec<ReleasedDelivery>> {
        let mut timed_out: Vec<(u64, u64)> = Vec::new();
        for consumer_entry in self.pending.iter() {
            let consumer_id = *consumer_entry.key();
            for pending_entry in consumer_entry.value().iter() {
                let elapsed = now.saturating_sub(*pending_entry.value());
                if elapsed as u64 > ack_timeout_ms {
                    timed_out.push((consumer_id, *pending_entry.key()));
                }
            }
        }

        let mut released = Vec::with_capacity(timed_out.len());
        for (consumer_id, message_id) in timed_out {
            released.extend(self.nack(consumer_id, Some(message_id), true, now)?);
        }
        Ok(released)
    }

    pub fn pending_count(&self, consumer_id: u64) -> usize {
        self.pending.get(&consumer_id).map(|m| m.len()).unwrap_or(0)
    }
}
