//! An embeddable, in-process message broker organized around named topics.
//!
//! Each [`topic::Topic`] owns its own pipeline, router, queues, delayed
//! queue, dead-letter queue, ack bookkeeping, client registry, and metrics;
//! a [`registry::TopicRegistry`] is the directory that creates and looks
//! them up by name. Wire-level metadata encoding lives in [`codec`], and
//! pluggable collaborators (the persistent store, the payload codec, schema
//! validators) are traits callers implement themselves.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use embroker::config::TopicConfig;
//! use embroker::registry::TopicRegistry;
//! use embroker::storage::MemoryStore;
//! use embroker::topic::{ConsumerOptions, PublishOptions};
//!
//! # async fn run() -> embroker::error::BrokerResult<()> {
//! let registry = TopicRegistry::new(Arc::new(MemoryStore::new()));
//! let topic = registry.create_topic("orders", TopicConfig::default())?;
//!
//! let producer = topic.create_producer();
//! let consumer = topic.create_consumer(ConsumerOptions::default());
//!
//! topic.publish(producer, b"hello".to_vec(), PublishOptions::default()).await;
//! if let Some((_meta, payload)) = topic.consume(consumer, true).await? {
//!     assert_eq!(payload, b"hello");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Module organization
//!
//! - [`error`] — the crate-wide [`error::BrokerError`] and [`error::PublishOutcome`].
//! - [`message`] — [`message::MessageMetadata`] and the client/reason enums.
//! - [`codec`] — the metadata wire format and the payload codec contract.
//! - [`config`] — [`config::TopicConfig`] and its builder.
//! - [`storage`] — buffered message storage over a pluggable [`storage::PersistentStore`].
//! - [`pipeline`] — expiration/delay/attempts classification.
//! - [`routing`] — the consistent-hash router.
//! - [`queue`] — per-consumer priority queues.
//! - [`delayed`] — the delayed-message heap.
//! - [`dlq`] — the dead-letter queue and its per-consumer readers.
//! - [`ack`] — pending-delivery and awaited-ack bookkeeping.
//! - [`client`] — the producer/consumer/DLQ-consumer registry.
//! - [`metrics`] — counters and the latency EMA.
//! - [`schema`] — named payload validators.
//! - [`log`] — deferred, chunked log emission.
//! - [`topic`] — the per-topic façade that composes all of the above.
//! - [`registry`] — the named-topic directory.

pub mod ack;
pub mod client;
pub mod codec;
pub mod config;
pub mod delayed;
pub mod dlq;
pub mod error;
pub mod log;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod schema;
pub mod storage;
pub mod topic;

pub use config::TopicConfig;
pub use error::{BrokerError, BrokerResult, PublishOutcome};
pub use registry::TopicRegistry;
pub use topic::{ConsumerOptions, PublishOptions, Topic};
