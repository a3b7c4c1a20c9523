//! The single-topic façade: composes storage, pipeline, router, queues,
//! the delayed queue, the DLQ, the ack manager, the client registry, and
//! metrics behind one public API, and owns the background workers that
//! drive the timer-based parts of that composition.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::ack::{AckManager, ReleasedDelivery};
use crate::client::{ActivityDelta, ClientManager};
use crate::codec::MetaField;
use crate::config::{validate_topic_name, TopicConfig};
use crate::dlq::{DLQManager, DlqEntry};
use crate::error::{BrokerError, BrokerResult, PublishOutcome};
use crate::log::{LogCollector, LogLevel, LogRecord};
use crate::message::{now_millis, ClientType, DlqReason, MessageMetadata, MessageMetadataBuilder};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::queue::QueueManager;
use crate::routing::{Router, DEFAULT_REPLICAS};
use crate::schema::SchemaRegistry;
use crate::storage::{MessageStorage, PersistentStore};

/// Per-message options a producer can set on publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: Option<u8>,
    pub ttl_ms: Option<u64>,
    pub ttd_ms: Option<u64>,
    pub correlation_id: Option<String>,
    pub routing_key: Option<String>,
}

/// Options a consumer registers with.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub routing_keys: Option<HashSet<String>>,
}

const LOG_CHUNK_SIZE: usize = 64;

pub struct Topic {
    name: String,
    config: TopicConfig,
    storage: Arc<MessageStorage>,
    pipeline: Pipeline,
    router: Router,
    queues: QueueManager,
    delayed: crate::delayed::DelayedQueueManager,
    /// Time-ordered heap of `(expiresAt, id)` for every message currently
    /// sitting in a consumer queue with a `ttl`. Reuses `DelayedQueueManager`
    /// verbatim: both are "pop everything due by now" heaps driven by one
    /// deferred timer, just keyed on a different instant.
    expiry: crate::delayed::DelayedQueueManager,
    dlq: DLQManager,
    ack: AckManager,
    clients: ClientManager,
    metrics: MetricsCollector,
    schema: Arc<SchemaRegistry>,
    log: LogCollector,
    next_message_id: AtomicU64,
    state_lock: AsyncMutex<()>,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
}

impl Topic {
    pub fn new(
        name: impl Into<String>,
        config: TopicConfig,
        persistent: Arc<dyn PersistentStore>,
        schema: Arc<SchemaRegistry>,
    ) -> BrokerResult<Arc<Self>> {
        let name = name.into();
        if !validate_topic_name(&name) {
            return Err(BrokerError::invalid_argument(format!("invalid topic name '{name}'")));
        }

        let (storage, mut error_rx) = MessageStorage::new(persistent);
        let storage = Arc::new(storage);
        let clients = ClientManager::new(
            config.consumer_processing_time_threshold_ms,
            config.consumer_pending_threshold,
            config.consumer_inactivity_threshold_ms,
        );

        let topic = Arc::new(Self {
            pipeline: Pipeline::new(config.max_delivery_attempts),
            router: Router::new(DEFAULT_REPLICAS),
            queues: QueueManager::new(),
            delayed: crate::delayed::DelayedQueueManager::new(),
            expiry: crate::delayed::DelayedQueueManager::new(),
            dlq: DLQManager::new(storage.clone()),
            ack: AckManager::new(storage.clone()),
            clients,
            metrics: MetricsCollector::new(),
            log: LogCollector::new(LOG_CHUNK_SIZE),
            next_message_id: AtomicU64::new(1),
            state_lock: AsyncMutex::new(()),
            workers: SyncMutex::new(Vec::new()),
            storage,
            schema,
            name,
            config,
        });

        let error_forwarder = {
            let weak = Arc::downgrade(&topic);
            tokio::spawn(async move {
                while let Some(err) = error_rx.recv().await {
                    let Some(topic) = weak.upgrade() else { return };
                    topic.log.push(LogRecord::new(LogLevel::Error, err.to_string(), now_millis()));
                    topic.log.flush();
                }
            })
        };

        let flush_handle = spawn_flush_worker(&topic);
        let ack_timeout_handle = spawn_ack_timeout_worker(&topic);
        let inactivity_handle = spawn_inactivity_worker(&topic);
        let delayed_handle = spawn_delayed_worker(&topic);
        let expiry_handle = spawn_expiry_worker(&topic);

        *topic.workers.lock() = vec![
            error_forwarder,
            flush_handle,
            ack_timeout_handle,
            inactivity_handle,
            delayed_handle,
            expiry_handle,
        ];

        Ok(topic)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn create_producer(&self) -> u64 {
        self.clients.register(ClientType::Producer, now_millis())
    }

    pub fn create_consumer(&self, opts: ConsumerOptions) -> u64 {
        let id = self.clients.register(ClientType::Consumer, now_millis());
        self.queues.add_consumer_queue(id);
        self.router.add_consumer(id, opts.routing_keys);
        id
    }

    pub fn create_dlq_consumer(&self) -> u64 {
        self.clients.register(ClientType::DlqConsumer, now_millis())
    }

    pub fn delete_client(&self, client_id: u64) {
        self.queues.remove_consumer_queue(client_id);
        self.router.remove_consumer(client_id);
        self.clients.deregister(client_id);
    }

    pub fn record_client_activity(&self, client_id: u64, delta: ActivityDelta) -> BrokerResult<()> {
        self.clients.record_activity(client_id, delta, now_millis())
    }

    pub fn get_metadata(&self, id: u64, fields: &[MetaField]) -> BrokerResult<MessageMetadata> {
        self.storage.read_metadata(id, fields)
    }

    fn allocate_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// `validate -> store -> record enqueue metric -> run pipeline; if
    /// unhandled, route, then setAwaitedAcksCount`. Per-message failures
    /// never abort the rest of the batch.
    pub async fn publish_batch(&self, producer_id: u64, items: Vec<(Vec<u8>, PublishOptions)>) -> Vec<PublishOutcome> {
        if let Err(err) = self.clients.expect_type(producer_id, ClientType::Producer) {
            return items.into_iter().map(|_| PublishOutcome::failed(0, err.clone())).collect();
        }

        let now = now_millis();
        let batch_size = items.len();
        let batch_id = if batch_size > 1 { Some(self.allocate_id()) } else { None };

        let _guard = self.state_lock.lock().await;
        let mut outcomes = Vec::with_capacity(batch_size);
        for (idx, (payload, opts)) in items.into_iter().enumerate() {
            let id = self.allocate_id();
            let outcome = self
                .publish_one(producer_id, id, payload, opts, batch_id, idx as u16, batch_size as u16, now)
                .await;
            outcomes.push(match outcome {
                Ok(()) => PublishOutcome::ok(id),
                Err(err) => PublishOutcome::failed(id, err),
            });
        }
        outcomes
    }

    pub async fn publish(&self, producer_id: u64, payload: Vec<u8>, opts: PublishOptions) -> PublishOutcome {
        match self.publish_batch(producer_id, vec![(payload, opts)]).await.into_iter().next() {
            Some(outcome) => outcome,
            None => PublishOutcome::failed(
                0,
                BrokerError::internal("publish_batch returned no outcome for a single-item batch"),
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_one(
        &self,
        producer_id: u64,
        id: u64,
        payload: Vec<u8>,
        opts: PublishOptions,
        batch_id: Option<u64>,
        batch_idx: u16,
        batch_size: u16,
        now: i64,
    ) -> BrokerResult<()> {
        if let Some(max) = self.config.max_message_size {
            if payload.len() as u32 > max {
                return Err(BrokerError::invalid_argument("message exceeds maxMessageSize"));
            }
        }
        if let Some(max) = self.config.max_size_bytes {
            if self.storage.total_bytes_admitted() + payload.len() as u64 > max {
                return Err(BrokerError::invalid_argument("topic byte admission cap exceeded"));
            }
        }
        if let Some(schema) = &self.config.schema {
            self.schema.validate(schema, &payload)?;
        }

        let mut builder = MessageMetadataBuilder::new(id, producer_id, self.name.as_str(), payload.len() as u32);
        if let Some(priority) = opts.priority {
            builder = builder.priority(priority);
        }
        if let Some(ttl) = opts.ttl_ms {
            builder = builder.ttl(ttl);
        }
        if let Some(ttd) = opts.ttd_ms {
            builder = builder.ttd(ttd);
        }
        if let Some(batch_id) = batch_id {
            builder = builder.batch(batch_id, batch_idx, batch_size);
        }
        if let Some(correlation_id) = opts.correlation_id {
            builder = builder.correlation_id(correlation_id);
        }
        if let Some(routing_key) = opts.routing_key {
            builder = builder.routing_key(routing_key);
        }
        let meta = builder.build();

        self.storage.write_all(vec![(meta.clone(), payload)]).remove(0).1?;
        self.metrics.record_publish(meta.size);
        self.divert_or_enqueue(meta, now)
    }

    /// Dequeues the highest-priority message for `consumer_id`. A message
    /// that expired while sitting unconsumed in this consumer's own queue is
    /// also caught here, in addition to the expiry sweep worker that catches
    /// one with no consumer ever polling: it is diverted to the DLQ and the
    /// loop moves on to the next queued id.
    pub async fn consume(&self, consumer_id: u64, auto_ack: bool) -> BrokerResult<Option<(MessageMetadata, Vec<u8>)>> {
        self.clients.expect_type(consumer_id, ClientType::Consumer)?;
        loop {
            let Some(id) = self.queues.dequeue(consumer_id) else {
                return Ok(None);
            };
            let (meta, payload) = self.storage.read_message(id)?;
            let now = now_millis();

            if meta.is_expired(now) {
                self.expire_if_still_outstanding(id);
                continue;
            }

            self.metrics.record_dequeue((now - meta.ts) as f64);
            if auto_ack {
                self.ack.decrement_awaited_acks(id, now)?;
            } else {
                self.ack.add_pending(consumer_id, id, now);
            }
            self.clients.record_activity(
                consumer_id,
                ActivityDelta {
                    message_count_delta: 1,
                    ..Default::default()
                },
                now,
            )?;
            return Ok(Some((meta, payload)));
        }
    }

    pub fn ack(&self, consumer_id: u64, id: Option<u64>) -> BrokerResult<Vec<u64>> {
        self.clients.expect_type(consumer_id, ClientType::Consumer)?;
        let now = now_millis();
        let completions = self.ack.ack_with_completions(consumer_id, id, now)?;
        Ok(completions.into_iter().map(|(id, _)| id).collect())
    }

    pub fn nack(&self, consumer_id: u64, id: Option<u64>, requeue: bool) -> BrokerResult<Vec<u64>> {
        self.clients.expect_type(consumer_id, ClientType::Consumer)?;
        let now = now_millis();
        let released = self.ack.nack(consumer_id, id, requeue, now)?;
        let ids = released.iter().map(|d| d.message_id).collect();
        for delivery in released {
            self.finish_nack(delivery, now)?;
        }
        Ok(ids)
    }

    pub fn create_dlq_reader(&self, consumer_id: u64) -> BrokerResult<()> {
        self.clients.expect_type(consumer_id, ClientType::DlqConsumer)?;
        Ok(())
    }

    pub fn read_next_dlq_entry(&self, consumer_id: u64) -> Option<DlqEntry> {
        self.dlq.read_next(consumer_id)
    }

    pub async fn replay_dlq<F, Fut>(
        &self,
        consumer_id: u64,
        filter: impl FnMut(&DlqEntry) -> bool,
        handler: F,
    ) -> BrokerResult<usize>
    where
        F: FnMut(Vec<u8>, MessageMetadata) -> Fut,
        Fut: std::future::Future<Output = BrokerResult<()>>,
    {
        self.clients.expect_type(consumer_id, ClientType::DlqConsumer)?;
        Ok(self.dlq.replay_messages(consumer_id, filter, handler).await)
    }

    /// Full pipeline re-evaluation (Expiration/Delay/Attempts), then route
    /// through the consistent-hash router. Used for the first publish pass
    /// and for anything re-entering after the delayed queue drains it.
    fn divert_or_enqueue(&self, meta: MessageMetadata, now: i64) -> BrokerResult<()> {
        match self.pipeline.process(&meta, now) {
            PipelineOutcome::PassThrough => self.route_and_enqueue(&meta),
            PipelineOutcome::DeadLetter(reason) => {
                self.dlq.publish(meta.id, reason);
                Ok(())
            }
            PipelineOutcome::Delay { ready_at } => {
                self.delayed.insert(meta.id, ready_at);
                Ok(())
            }
        }
    }

    fn route_and_enqueue(&self, meta: &MessageMetadata) -> BrokerResult<()> {
        let active = self.clients.active_consumers();
        match self.router.route(meta, &active) {
            crate::routing::RouteDecision::Enqueue(targets) => {
                for consumer_id in &targets {
                    self.queues.enqueue(*consumer_id, meta.id, meta.priority)?;
                    self.metrics.record_enqueue((now_millis() - meta.ts) as f64);
                }
                self.ack.set_awaited_acks_count(meta.id, targets.len() as u32);
                if let Some(expires_at) = meta.expires_at() {
                    self.expiry.insert(meta.id, expires_at);
                }
                Ok(())
            }
            crate::routing::RouteDecision::DeadLetter(reason) => {
                self.dlq.publish(meta.id, reason);
                Ok(())
            }
        }
    }

    /// Dead-letter an expired message and release its awaited-ack count, but
    /// only if it is still actually outstanding. `clear_awaited_acks`'s
    /// removal is the atomic gate: a consumer's own dequeue and the expiry
    /// sweep can both reach this for the same id, but only the one that
    /// actually finds and removes a nonzero count proceeds, so the DLQ entry
    /// is published exactly once regardless of which caller wins the race.
    fn expire_if_still_outstanding(&self, id: u64) {
        if self.ack.clear_awaited_acks(id) == 0 {
            return;
        }
        self.queues.remove_id(id);
        self.dlq.publish(id, DlqReason::Expired);
    }

    /// The tail of a nack: re-run the pipeline on the redelivered metadata;
    /// if it still passes through, re-enqueue to the *same* consumer (not
    /// re-routed) and restore the awaited-ack count the nack's internal
    /// `ack` call consumed.
    fn finish_nack(&self, delivery: ReleasedDelivery, now: i64) -> BrokerResult<()> {
        let Some(meta) = delivery.metadata else {
            return Ok(());
        };
        match self.pipeline.process(&meta, now) {
            PipelineOutcome::PassThrough => {
                self.queues.enqueue(delivery.consumer_id, meta.id, meta.priority)?;
                self.ack.increment_awaited_acks(meta.id);
                self.metrics.record_enqueue((now - meta.ts) as f64);
                Ok(())
            }
            PipelineOutcome::DeadLetter(reason) => {
                self.dlq.publish(meta.id, reason);
                Ok(())
            }
            PipelineOutcome::Delay { ready_at } => {
                self.delayed.insert(meta.id, ready_at);
                Ok(())
            }
        }
    }
}

impl Drop for Topic {
    fn drop(&mut self) {
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }
}

// Every worker below holds only a `Weak<Topic>`, upgrading it each tick and
// exiting once the upgrade fails. Holding a strong `Arc<Topic>` here would
// create a cycle against `Topic::workers`/`Drop` and the topic would never
// deallocate once its registry entry was dropped.

fn spawn_flush_worker(topic: &Arc<Topic>) -> JoinHandle<()> {
    let weak = Arc::downgrade(topic);
    let interval = topic.config.persist_threshold();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(topic) = weak.upgrade() else { return };
            let chunk_size = topic.config.persist_chunk_size;
            while topic.storage.flush(chunk_size).await {}
        }
    })
}

fn spawn_ack_timeout_worker(topic: &Arc<Topic>) -> JoinHandle<()> {
    let weak = Arc::downgrade(topic);
    let interval = topic.config.ack_sweep_interval();
    let ack_timeout_ms = topic.config.ack_timeout_ms;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(topic) = weak.upgrade() else { return };
            let now = now_millis();
            if let Ok(released) = topic.ack.sweep_timeouts(now, ack_timeout_ms) {
                for delivery in released {
                    let _ = topic.finish_nack(delivery, now);
                }
            }
        }
    })
}

fn spawn_inactivity_worker(topic: &Arc<Topic>) -> JoinHandle<()> {
    let weak = Arc::downgrade(topic);
    let interval = topic.config.inactivity_sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(topic) = weak.upgrade() else { return };
            topic.clients.sweep_inactivity(now_millis());
        }
    })
}

fn spawn_delayed_worker(topic: &Arc<Topic>) -> JoinHandle<()> {
    let weak = Arc::downgrade(topic);
    tokio::spawn(async move {
        loop {
            let Some(topic) = weak.upgrade() else { return };
            let wait = match topic.delayed.next_ready_at() {
                Some(ready_at) => {
                    let now = now_millis();
                    (ready_at - now).max(0) as u64
                }
                None => 1_000,
            };
            drop(topic);
            tokio::time::sleep(Duration::from_millis(wait)).await;

            let Some(topic) = weak.upgrade() else { return };
            if !topic.delayed.begin_processing() {
                continue;
            }
            let now = now_millis();
            for id in topic.delayed.drain_due(now) {
                if let Ok((meta, _)) = topic.storage.read_message(id) {
                    let _ = topic.route_and_enqueue(&meta);
                }
            }
            topic.delayed.end_processing();
        }
    })
}

/// Mirrors `spawn_delayed_worker` but keyed on `expiry` instead of `delayed`:
/// pops every message whose TTL has lapsed and routes it to the DLQ even if
/// no consumer ever calls `consume` for it.
fn spawn_expiry_worker(topic: &Arc<Topic>) -> JoinHandle<()> {
    let weak = Arc::downgrade(topic);
    tokio::spawn(async move {
        loop {
            let Some(topic) = weak.upgrade() else { return };
            let wait = match topic.expiry.next_ready_at() {
                Some(expires_at) => {
                    let now = now_millis();
                    (expires_at - now).max(0) as u64
                }
                None => 1_000,
            };
            drop(topic);
            tokio::time::sleep(Duration::from_millis(wait)).await;

            let Some(topic) = weak.upgrade() else { return };
            if !topic.expiry.begin_processing() {
                continue;
            }
            let now = now_millis();
            for id in topic.expiry.drain_due(now) {
                topic.expire_if_still_outstanding(id);
            }
            topic.expiry.end_processing();
        }
    })
}
