//! [`MessageMetadata`]: the mutable delivery-state record that travels
//! alongside an immutable payload through storage, the pipeline, the
//! router, and the ack manager.

// Layer 1: standard library imports
use std::fmt;

// Layer 2: third-party crate imports
use chrono::Utc;

use super::attempts::DeliveryAttempts;

/// Current epoch-millisecond timestamp, used for every `ts`/`consumedAt`
/// comparison in the broker.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The three client roles a registered id can hold. `spec.md` §9 describes
/// these as capability sets (`ICanPublish`, `ICanConsume`, `ICanConsumeDLQ`);
/// we realize that as a plain discriminant checked at each public `Topic`
/// entry point rather than as three marker traits, since the broker only
/// ever needs to ask "is this id allowed to do X", never to dispatch on type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    Producer,
    Consumer,
    DlqConsumer,
}

impl ClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
            Self::DlqConsumer => "dlq_consumer",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message ended up in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DlqReason {
    NoConsumers,
    Expired,
    MaxAttempts,
    Validation,
    ProcessingError,
}

impl DlqReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoConsumers => "no_consumers",
            Self::Expired => "expired",
            Self::MaxAttempts => "max_attempts",
            Self::Validation => "validation",
            Self::ProcessingError => "processing_error",
        }
    }
}

impl fmt::Display for DlqReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery-state metadata for a single message.
///
/// The payload itself lives in [`crate::storage::MessageStorage`] under the
/// same id; this struct is everything the pipeline, router, queues, and ack
/// manager need without touching the payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMetadata {
    pub id: u64,
    pub ts: i64,
    pub producer_id: u64,
    pub topic: String,
    pub priority: Option<u8>,
    pub ttl: Option<u64>,
    pub ttd: Option<u64>,
    pub batch_id: Option<u64>,
    pub batch_idx: Option<u16>,
    pub batch_size: Option<u16>,
    pub correlation_id: Option<String>,
    pub routing_key: Option<String>,
    pub attempts: DeliveryAttempts,
    pub consumed_at: Option<i64>,
    pub size: u32,
    pub need_acks: u32,
}

impl MessageMetadata {
    /// `true` once `ts + ttl <= now`, or if the delay would outlive the ttl
    /// (`ttd >= ttl`) — the expiration/delay ordering rule from the
    /// pipeline's `ExpirationProcessor`.
    pub fn is_expired(&self, now: i64) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => {
                let expires_at = self.ts.saturating_add(ttl as i64);
                if expires_at <= now {
                    return true;
                }
                match self.ttd {
                    Some(ttd) => ttd >= ttl,
                    None => false,
                }
            }
        }
    }

    /// `true` while the message is still within its delay window.
    pub fn is_delayed(&self, now: i64) -> bool {
        match self.ttd {
            None => false,
            Some(ttd) => self.ts.saturating_add(ttd as i64) > now,
        }
    }

    /// The instant at which a delayed message becomes ready, if it has a
    /// `ttd`.
    pub fn ready_at(&self) -> Option<i64> {
        self.ttd.map(|ttd| self.ts.saturating_add(ttd as i64))
    }

    /// The instant at which an unconsumed message becomes expired, if it has
    /// a `ttl`. Used to seed the expiry sweep's time-ordered heap.
    pub fn expires_at(&self) -> Option<i64> {
        self.ttl.map(|ttl| self.ts.saturating_add(ttl as i64))
    }

    pub fn exceeds_attempts(&self, max: u32) -> bool {
        self.attempts.exceeds(max)
    }
}

/// Fluent builder for [`MessageMetadata`], used by `Topic::publish` so
/// callers only specify the fields they care about.
#[derive(Debug, Clone)]
pub struct MessageMetadataBuilder {
    id: u64,
    producer_id: u64,
    topic: String,
    size: u32,
    priority: Option<u8>,
    ttl: Option<u64>,
    ttd: Option<u64>,
    batch_id: Option<u64>,
    batch_idx: Option<u16>,
    batch_size: Option<u16>,
    correlation_id: Option<String>,
    routing_key: Option<String>,
}

impl MessageMetadataBuilder {
    pub fn new(id: u64, producer_id: u64, topic: impl Into<String>, size: u32) -> Self {
        Self {
            id,
            producer_id,
            topic: topic.into(),
            size,
            priority: None,
            ttl: None,
            ttd: None,
            batch_id: None,
            batch_idx: None,
            batch_size: None,
            correlation_id: None,
            routing_key: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn ttd(mut self, ttd_ms: u64) -> Self {
        self.ttd = Some(ttd_ms);
        self
    }

    pub fn batch(mut self, batch_id: u64, batch_idx: u16, batch_size: u16) -> Self {
        self.batch_id = Some(batch_id);
        self.batch_idx = Some(batch_idx);
        self.batch_size = Some(batch_size);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn build(self) -> MessageMetadata {
        MessageMetadata {
            id: self.id,
            ts: now_millis(),
            producer_id: self.producer_id,
            topic: self.topic,
            priority: self.priority,
            ttl: self.ttl,
            ttd: self.ttd,
            batch_id: self.batch_id,
            batch_idx: self.batch_idx,
            batch_size: self.batch_size,
            correlation_id: self.correlation_id,
            routing_key: self.routing_key,
            attempts: DeliveryAttempts::INITIAL,
            consumed_at: None,
            size: self.size,
            need_acks: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> MessageMetadata {
        MessageMetadataBuilder::new(1, 10, "orders", 16).build()
    }

    #[test]
    fn no_ttl_never_expires() {
        let m = meta();
        assert!(!m.is_expired(m.ts + 1_000_000));
    }

    #[test]
    fn ttl_expires_once_elapsed() {
        let mut m = meta();
        m.ttl = Some(50);
        assert!(!m.is_expired(m.ts + 10));
        assert!(m.is_expired(m.ts + 50));
        assert!(m.is_expired(m.ts + 100));
    }

    #[test]
    fn ttd_ge_ttl_counts_as_expired() {
        let mut m = meta();
        m.ttl = Some(100);
        m.ttd = Some(200);
        // still within the raw ttl window, but ttd >= ttl forces expiration
        assert!(m.is_expired(m.ts + 10));
    }

    #[test]
    fn delay_window_closes_at_ready_at() {
        let mut m = meta();
        m.ttd = Some(200);
        assert!(m.is_delayed(m.ts + 100));
        assert!(!m.is_delayed(m.ts + 200));
        assert_eq!(m.ready_at(), Some(m.ts + 200));
    }

    #[test]
    fn expires_at_tracks_ts_plus_ttl() {
        let mut m = meta();
        assert_eq!(m.expires_at(), None);
        m.ttl = Some(50);
        assert_eq!(m.expires_at(), Some(m.ts + 50));
    }

    #[test]
    fn builder_sets_initial_attempts_and_no_need_acks() {
        let m = meta();
        assert_eq!(m.attempts, DeliveryAttempts::INITIAL);
        assert_eq!(m.need_acks, 0);
        assert!(m.consumed_at.is_none());
    }

    #[test]
    fn client_type_display() {
        assert_eq!(ClientType::DlqConsumer.to_string(), "dlq_consumer");
    }

    #[test]
    fn dlq_reason_display() {
        assert_eq!(DlqReason::MaxAttempts.to_string(), "max_attempts");
    }
}
