//! Router Benchmarks
//!
//! Measures baseline performance of consistent-hash routing:
//! - Fan-out routing with no routing key, across varying consumer counts
//! - Routing-key-filtered routing
//! - Correlation-id sticky routing
//! - Consumer membership churn (add/remove)

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

// Layer 1: Standard library imports
use std::collections::HashSet;
use std::hint::black_box;
use std::time::Duration;

// Layer 2: Third-party crate imports
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

// Layer 3: Internal module imports
use embroker::message::MessageMetadataBuilder;
use embroker::routing::{Router, DEFAULT_REPLICAS};

fn meta_with(routing_key: Option<&str>, correlation_id: Option<&str>) -> embroker::message::MessageMetadata {
    let mut builder = MessageMetadataBuilder::new(1, 1, "orders", 64);
    if let Some(k) = routing_key {
        builder = builder.routing_key(k);
    }
    if let Some(c) = correlation_id {
        builder = builder.correlation_id(c);
    }
    builder.build()
}

fn router_with_consumers(n: u64) -> (Router, HashSet<u64>) {
    let router = Router::new(DEFAULT_REPLICAS);
    let active: HashSet<u64> = (1..=n).collect();
    for id in 1..=n {
        router.add_consumer(id, None);
    }
    (router, active)
}

/// Benchmark: fan-out routing (no routing key) at varying consumer counts.
fn route_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_fan_out");
    for &n in &[1u64, 10, 100, 1_000] {
        let (router, active) = router_with_consumers(n);
        let meta = meta_with(None, None);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(router.route(&meta, &active)));
        });
    }
    group.finish();
}

/// Benchmark: routing-key filtered routing, half the consumers excluded.
fn route_with_routing_key(c: &mut Criterion) {
    let router = Router::new(DEFAULT_REPLICAS);
    let active: HashSet<u64> = (1..=100).collect();
    for id in 1..=100 {
        if id % 2 == 0 {
            router.add_consumer(id, Some(["red".to_string()].into_iter().collect()));
        } else {
            router.add_consumer(id, None);
        }
    }
    let meta = meta_with(Some("red"), None);

    c.bench_function("route_with_routing_key", |b| {
        b.iter(|| black_box(router.route(&meta, &active)));
    });
}

/// Benchmark: correlation-id sticky routing across a ring of consumers.
fn route_with_correlation_id(c: &mut Criterion) {
    let (router, active) = router_with_consumers(100);
    let meta = meta_with(None, Some("user-7"));

    c.bench_function("route_with_correlation_id", |b| {
        b.iter(|| black_box(router.route(&meta, &active)));
    });
}

/// Benchmark: consumer membership churn (add then remove) on a mid-sized ring.
fn consumer_churn(c: &mut Criterion) {
    let (router, _active) = router_with_consumers(100);

    c.bench_function("consumer_churn", |b| {
        b.iter(|| {
            router.add_consumer(9_999, None);
            router.remove_consumer(9_999);
            black_box(router.total_consumers());
        });
    });
}

/// Configure criterion for resource-conscious benchmarking.
fn configure_criterion() -> Criterion {
    Criterion::default()
        .sample_size(30)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(2))
        .without_plots()
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets =
        route_fan_out,
        route_with_routing_key,
        route_with_correlation_id,
        consumer_churn
}

criterion_main!(benches);
