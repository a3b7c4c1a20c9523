//! Client registry: producers, consumers, and DLQ-consumers, plus the
//! rolled-up activity stats that drive `activeConsumers` membership.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};

use crate::error::{BrokerError, BrokerResult};
use crate::message::ClientType;

/// Coarse health classification reported by a consumer's own activity
/// updates (e.g. a consumer self-reports `lagging` when its queue backs up
/// faster than it can drain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Active,
    Idle,
    Lagging,
}

/// Per-client registered and rolled-up state.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub id: u64,
    pub client_type: ClientType,
    pub registered_at: i64,
    pub last_active_at: i64,
    pub status: ClientStatus,
    pub message_count: u64,
    pub pending_messages: u64,
    pub processing_time: u64,
    pub avg_processing_time: f64,
}

/// A partial activity update. Numeric fields are applied as additive
/// deltas (running totals); `status` is a plain replacement.
#[derive(Debug, Clone, Default)]
pub struct ActivityDelta {
    pub message_count_delta: u64,
    pub pending_messages_delta: i64,
    pub processing_time_delta: u64,
    pub status: Option<ClientStatus>,
}

/// Registry of producers/consumers/dlq-consumers with activity rollups and
/// `activeConsumers` eligibility tracking.
pub struct ClientManager {
    clients: DashMap<u64, ClientState>,
    active_consumers: DashSet<u64>,
    next_id: AtomicU64,
    processing_time_threshold_ms: Option<u64>,
    pending_threshold: Option<u64>,
    inactivity_threshold_ms: u64,
}

impl ClientManager {
    pub fn new(
        processing_time_threshold_ms: Option<u64>,
        pending_threshold: Option<u64>,
        inactivity_threshold_ms: u64,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            active_consumers: DashSet::new(),
            next_id: AtomicU64::new(1),
            processing_time_threshold_ms,
            pending_threshold,
            inactivity_threshold_ms,
        }
    }

    pub fn register(&self, client_type: ClientType, now: i64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(
            id,
            ClientState {
                id,
                client_type,
                registered_at: now,
                last_active_at: now,
                status: ClientStatus::Active,
                message_count: 0,
                pending_messages: 0,
                processing_time: 0,
                avg_processing_time: 0.0,
            },
        );
        if client_type == ClientType::Consumer {
            self.active_consumers.insert(id);
        }
        id
    }

    pub fn deregister(&self, id: u64) {
        self.clients.remove(&id);
        self.active_consumers.remove(&id);
    }

    pub fn get(&self, id: u64) -> Option<ClientState> {
        self.clients.get(&id).map(|r| r.clone())
    }

    /// Validates that `id` is registered with the expected type.
    pub fn expect_type(&self, id: u64, expected: ClientType) -> BrokerResult<()> {
        let client = self
            .clients
            .get(&id)
            .ok_or_else(|| BrokerError::not_found(format!("client {id}")))?;
        if client.client_type != expected {
            return Err(BrokerError::type_mismatch(id, expected.as_str(), client.client_type.as_str()));
        }
        Ok(())
    }

    /// Applies a partial activity update and re-evaluates `activeConsumers`
    /// membership for consumer clients.
    pub fn record_activity(&self, id: u64, delta: ActivityDelta, now: i64) -> BrokerResult<()> {
        let mut client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found(format!("client {id}")))?;

        client.last_active_at = now;
        client.message_count += delta.message_count_delta;
        client.pending_messages = client
            .pending_messages
            .saturating_add_signed(delta.pending_messages_delta);
        client.processing_time += delta.processing_time_delta;
        if let Some(status) = delta.status {
            client.status = status;
        }
        if client.message_count > 0 {
            client.avg_processing_time = client.processing_time as f64 / client.message_count as f64;
        }

        if client.client_type == ClientType::Consumer {
            let should_be_active = self.consumer_is_eligible(&client);
            drop(client);
            if should_be_active {
                self.active_consumers.insert(id);
            } else {
                self.active_consumers.remove(&id);
            }
        }
        Ok(())
    }

    fn consumer_is_eligible(&self, client: &ClientState) -> bool {
        if client.status == ClientStatus::Lagging {
            return false;
        }
        if let Some(threshold) = self.processing_time_threshold_ms {
            if client.avg_processing_time > threshold as f64 {
                return false;
            }
        }
        if let Some(threshold) = self.pending_threshold {
            if client.pending_messages > threshold {
                return false;
            }
        }
        true
    }

    /// The set of consumers currently eligible for no-correlation fan-out
    /// routing.
    pub fn active_consumers(&self) -> HashSet<u64> {
        self.active_consumers.iter().map(|r| *r).collect()
    }

    /// Drops consumers from `activeConsumers` that haven't been active
    /// within `inactivityThresholdMs`. Registration itself is untouched —
    /// only fan-out eligibility.
    pub fn sweep_inactivity(&self, now: i64) {
        let stale: Vec<u64> = self
            .clients
            .iter()
            .filter(|entry| {
                entry.client_type == ClientType::Consumer
                    && now.saturating_sub(entry.last_active_at) as u64 > self.inactivity_threshold_ms
            })
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            self.active_consumers.remove(&id);
        }
    }
}
