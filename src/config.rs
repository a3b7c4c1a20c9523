//! Topic configuration.
//!
//! Mirrors the enumerated options in the wire/configuration contract: every
//! field is optional except the persistence cadence, which has a sane
//! default. Construct via [`TopicConfig::builder`] in the teacher's
//! `*Builder` style rather than a struct literal with a dozen `None`s.

use std::time::Duration;

/// Per-topic configuration.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Name of a schema registered in the `SchemaRegistry`, validated on
    /// every publish.
    pub schema: Option<String>,
    /// Whether published messages are persisted at all.
    pub persist: bool,
    /// Coalescing window for the storage flush worker.
    pub persist_threshold_ms: u64,
    /// Upper bound on how many dirty/tombstoned entries a single
    /// `MessageStorage::flush` call drains before yielding back to the
    /// flush worker, which reschedules immediately while entries remain.
    pub persist_chunk_size: usize,
    /// How long an unconsumed message may live before retention DLQs it.
    pub retention_ms: u64,
    /// Interval at which the (out-of-core-scope) archival sweep would run.
    pub archival_threshold_ms: u64,
    /// Cumulative lifetime byte admission cap, if any. Per the open
    /// question in the design notes this is never decremented on consume.
    pub max_size_bytes: Option<u64>,
    /// When set, enables the `AttemptsProcessor` stage of the pipeline.
    pub max_delivery_attempts: Option<u32>,
    /// Reject publishes whose encoded payload exceeds this size.
    pub max_message_size: Option<u32>,
    /// Upper bound on the interval between consume and ack before the
    /// ack-timeout worker nacks-and-requeues.
    pub ack_timeout_ms: u64,
    /// How long a consumer may go without activity before the inactivity
    /// sweep drops it from `activeConsumers`.
    pub consumer_inactivity_threshold_ms: u64,
    /// Average processing time above which a consumer is evicted from
    /// `activeConsumers`.
    pub consumer_processing_time_threshold_ms: Option<u64>,
    /// Pending-message balance above which a consumer is evicted from
    /// `activeConsumers`.
    pub consumer_pending_threshold: Option<u64>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            schema: None,
            persist: true,
            persist_threshold_ms: 100,
            persist_chunk_size: 256,
            retention_ms: 86_400_000,
            archival_threshold_ms: 100_000,
            max_size_bytes: None,
            max_delivery_attempts: None,
            max_message_size: None,
            ack_timeout_ms: 30_000,
            consumer_inactivity_threshold_ms: 600_000,
            consumer_processing_time_threshold_ms: None,
            consumer_pending_threshold: None,
        }
    }
}

impl TopicConfig {
    pub fn builder() -> TopicConfigBuilder {
        TopicConfigBuilder::default()
    }

    pub fn persist_threshold(&self) -> Duration {
        Duration::from_millis(self.persist_threshold_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// The ack-timeout worker's sweep period: `max(1s, ackTimeoutMs/2)`.
    pub fn ack_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms / 2).max(Duration::from_secs(1))
    }

    /// The inactivity sweep's period: `max(1s, inactivityThresholdMs/2)`.
    pub fn inactivity_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.consumer_inactivity_threshold_ms / 2).max(Duration::from_secs(1))
    }
}

/// Builder for [`TopicConfig`].
#[derive(Debug, Clone, Default)]
pub struct TopicConfigBuilder {
    inner: TopicConfigOverrides,
}

#[derive(Debug, Clone, Default)]
struct TopicConfigOverrides {
    schema: Option<String>,
    persist: Option<bool>,
    persist_threshold_ms: Option<u64>,
    persist_chunk_size: Option<usize>,
    retention_ms: Option<u64>,
    archival_threshold_ms: Option<u64>,
    max_size_bytes: Option<u64>,
    max_delivery_attempts: Option<u32>,
    max_message_size: Option<u32>,
    ack_timeout_ms: Option<u64>,
    consumer_inactivity_threshold_ms: Option<u64>,
    consumer_processing_time_threshold_ms: Option<u64>,
    consumer_pending_threshold: Option<u64>,
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.inner.$name = Some(value);
            self
        }
    };
}

impl TopicConfigBuilder {
    builder_field!(schema, String);
    builder_field!(persist, bool);
    builder_field!(persist_threshold_ms, u64);
    builder_field!(persist_chunk_size, usize);
    builder_field!(retention_ms, u64);
    builder_field!(archival_threshold_ms, u64);
    builder_field!(max_size_bytes, u64);
    builder_field!(max_delivery_attempts, u32);
    builder_field!(max_message_size, u32);
    builder_field!(ack_timeout_ms, u64);
    builder_field!(consumer_inactivity_threshold_ms, u64);
    builder_field!(consumer_processing_time_threshold_ms, u64);
    builder_field!(consumer_pending_threshold, u64);

    pub fn build(self) -> TopicConfig {
        let defaults = TopicConfig::default();
        let o = self.inner;
        TopicConfig {
            schema: o.schema.or(defaults.schema),
            persist: o.persist.unwrap_or(defaults.persist),
            persist_threshold_ms: o.persist_threshold_ms.unwrap_or(defaults.persist_threshold_ms),
            persist_chunk_size: o.persist_chunk_size.unwrap_or(defaults.persist_chunk_size),
            retention_ms: o.retention_ms.unwrap_or(defaults.retention_ms),
            archival_threshold_ms: o.archival_threshold_ms.unwrap_or(defaults.archival_threshold_ms),
            max_size_bytes: o.max_size_bytes.or(defaults.max_size_bytes),
            max_delivery_attempts: o.max_delivery_attempts.or(defaults.max_delivery_attempts),
            max_message_size: o.max_message_size.or(defaults.max_message_size),
            ack_timeout_ms: o.ack_timeout_ms.unwrap_or(defaults.ack_timeout_ms),
            consumer_inactivity_threshold_ms: o
                .consumer_inactivity_threshold_ms
                .unwrap_or(defaults.consumer_inactivity_threshold_ms),
            consumer_processing_time_threshold_ms: o
                .consumer_processing_time_threshold_ms
                .or(defaults.consumer_processing_time_threshold_ms),
            consumer_pending_threshold: o
                .consumer_pending_threshold
                .or(defaults.consumer_pending_threshold),
        }
    }
}

/// Validates a topic name against `^[A-Za-z0-9_-]+$`, non-empty.
pub fn validate_topic_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
