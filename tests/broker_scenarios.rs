//! End-to-end scenarios exercising a `Topic` through its public API:
//! fan-out, routing-key filtering, correlation stickiness, delay, expiry,
//! and ack-timeout redelivery with max-attempts dead-lettering.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use embroker::codec::MetaField;
use embroker::config::TopicConfig;
use embroker::message::DlqReason;
use embroker::registry::TopicRegistry;
use embroker::storage::MemoryStore;
use embroker::topic::{ConsumerOptions, PublishOptions};

fn registry() -> TopicRegistry {
    TopicRegistry::new(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn fan_out_to_three_consumers_with_full_ack_completion() {
    let registry = registry();
    let topic = registry.create_topic("orders", TopicConfig::default()).unwrap();
    let producer = topic.create_producer();
    let consumers: Vec<u64> = (0..3).map(|_| topic.create_consumer(ConsumerOptions::default())).collect();

    topic.publish(producer, b"{\"a\":1}".to_vec(), PublishOptions::default()).await;
    topic.publish(producer, b"{\"a\":2}".to_vec(), PublishOptions::default()).await;

    let mut acked = Vec::new();
    for &consumer in &consumers {
        for _ in 0..2 {
            let (meta, _) = topic.consume(consumer, false).await.unwrap().unwrap();
            acked.push((consumer, meta.id));
        }
    }
    assert_eq!(acked.len(), 6);

    for (consumer, id) in &acked {
        topic.ack(*consumer, Some(*id)).unwrap();
    }

    let meta_first = topic.get_metadata(acked[0].1, &[MetaField::ConsumedAt]).unwrap();
    assert!(meta_first.consumed_at.is_some());
}

#[tokio::test]
async fn routing_key_reaches_only_bound_and_unsubscribed_consumers() {
    let registry = registry();
    let topic = registry.create_topic("orders", TopicConfig::default()).unwrap();
    let producer = topic.create_producer();

    let red: HashSet<String> = ["red".to_string()].into_iter().collect();
    let blue: HashSet<String> = ["blue".to_string()].into_iter().collect();
    let c1 = topic.create_consumer(ConsumerOptions { routing_keys: Some(red) });
    let c2 = topic.create_consumer(ConsumerOptions { routing_keys: Some(blue) });
    let c3 = topic.create_consumer(ConsumerOptions::default());

    let opts = PublishOptions {
        routing_key: Some("red".to_string()),
        ..Default::default()
    };
    topic.publish(producer, b"x".to_vec(), opts).await;

    assert!(topic.consume(c1, true).await.unwrap().is_some());
    assert!(topic.consume(c3, true).await.unwrap().is_some());
    assert!(topic.consume(c2, true).await.unwrap().is_none());
}

#[tokio::test]
async fn correlation_ids_distribute_across_ten_consumers_consistently() {
    let registry = registry();
    let topic = registry.create_topic("orders", TopicConfig::default()).unwrap();
    let producer = topic.create_producer();
    let consumers: Vec<u64> = (0..3).map(|_| topic.create_consumer(ConsumerOptions::default())).collect();

    for i in 0..30u32 {
        let opts = PublishOptions {
            correlation_id: Some(format!("user-{}", i % 10)),
            ..Default::default()
        };
        topic.publish(producer, format!("msg-{i}").into_bytes(), opts).await;
    }

    let mut per_consumer_counts = Vec::new();
    for &consumer in &consumers {
        let mut count = 0;
        while topic.consume(consumer, true).await.unwrap().is_some() {
            count += 1;
        }
        per_consumer_counts.push(count);
    }
    assert_eq!(per_consumer_counts.iter().sum::<u32>(), 30);
    assert!(per_consumer_counts.iter().filter(|&&n| n > 0).count() <= 3);
}

#[tokio::test]
async fn delayed_message_is_invisible_until_its_ready_at() {
    let registry = registry();
    let topic = registry.create_topic("orders", TopicConfig::default()).unwrap();
    let producer = topic.create_producer();
    let consumer = topic.create_consumer(ConsumerOptions::default());

    let opts = PublishOptions {
        ttd_ms: Some(200),
        ..Default::default()
    };
    topic.publish(producer, b"later".to_vec(), opts).await;

    assert!(topic.consume(consumer, true).await.unwrap().is_none());

    // The delayed-queue worker's idle wait tops out at 1s when it starts
    // with nothing due, so allow for that on top of the 200ms delay.
    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let (meta, payload) = topic.consume(consumer, true).await.unwrap().unwrap();
    assert_eq!(payload, b"later");
    assert!(meta.ready_at().is_some());
}

#[tokio::test]
async fn expired_message_is_dead_lettered_instead_of_delivered() {
    let registry = registry();
    let topic = registry.create_topic("orders", TopicConfig::default()).unwrap();
    let producer = topic.create_producer();
    let consumer = topic.create_consumer(ConsumerOptions::default());
    let dlq_consumer = topic.create_dlq_consumer();

    let opts = PublishOptions {
        ttl_ms: Some(50),
        ..Default::default()
    };
    topic.publish(producer, b"stale".to_vec(), opts).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(topic.consume(consumer, true).await.unwrap().is_none());

    let entry = topic.read_next_dlq_entry(dlq_consumer).unwrap();
    assert_eq!(entry.reason, DlqReason::Expired);
    assert_eq!(entry.payload, b"stale");
}

#[tokio::test]
async fn expiry_sweep_dead_letters_a_message_no_consumer_ever_polls_for() {
    let registry = registry();
    let topic = registry.create_topic("orders", TopicConfig::default()).unwrap();
    let producer = topic.create_producer();
    // A consumer must exist for the message to be routed anywhere at all,
    // but it never calls `consume` — the sweep worker must catch this
    // without any help from the lazy on-consume check.
    let _consumer = topic.create_consumer(ConsumerOptions::default());
    let dlq_consumer = topic.create_dlq_consumer();

    let opts = PublishOptions {
        ttl_ms: Some(50),
        ..Default::default()
    };
    topic.publish(producer, b"unpolled".to_vec(), opts).await;

    // The expiry worker's idle wait tops out at 1s when it starts with
    // nothing due, so allow for that on top of the 50ms ttl.
    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let entry = topic.read_next_dlq_entry(dlq_consumer).unwrap();
    assert_eq!(entry.reason, DlqReason::Expired);
    assert_eq!(entry.payload, b"unpolled");
}

#[tokio::test]
async fn ack_timeout_requeues_then_max_attempts_dead_letters() {
    let registry = registry();
    let config = TopicConfig::builder().ack_timeout_ms(50).max_delivery_attempts(2).build();
    let topic = registry.create_topic("orders", config).unwrap();
    let producer = topic.create_producer();
    let consumer = topic.create_consumer(ConsumerOptions::default());
    let dlq_consumer = topic.create_dlq_consumer();

    topic.publish(producer, b"x".to_vec(), PublishOptions::default()).await;

    // First delivery, never acked. The sweep interval floors at 1s
    // regardless of how small ackTimeoutMs is.
    let (first, _) = topic.consume(consumer, false).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let (second, _) = topic.consume(consumer, false).await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempts, embroker::message::DeliveryAttempts::Count(2));

    // Second delivery, also never acked: attempts becomes 3 and exceeds
    // maxDeliveryAttempts=2, so the pipeline dead-letters it on redelivery.
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(topic.consume(consumer, true).await.unwrap().is_none());
    let entry = topic.read_next_dlq_entry(dlq_consumer).unwrap();
    assert_eq!(entry.reason, DlqReason::MaxAttempts);
}
