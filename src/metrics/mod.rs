//! Per-topic metrics: counters plus an exponential moving average of queue
//! latency, sampled on both enqueue and dequeue.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Smoothing factor for the latency EMA. Kept exactly as specified — do not
/// swap for a windowed mean, the shape of the response is load-bearing.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub bytes: u64,
    pub depth: u64,
    pub enqueue_rate: u64,
    pub dequeue_rate: u64,
    pub avg_latency_ms: f64,
}

pub struct MetricsCollector {
    published: AtomicU64,
    bytes: AtomicU64,
    depth: AtomicU64,
    enqueue_rate: AtomicU64,
    dequeue_rate: AtomicU64,
    avg_latency_ms: Mutex<f64>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            depth: AtomicU64::new(0),
            enqueue_rate: AtomicU64::new(0),
            dequeue_rate: AtomicU64::new(0),
            avg_latency_ms: Mutex::new(0.0),
        }
    }

    pub fn record_publish(&self, size: u32) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Call on every enqueue into a consumer queue.
    pub fn record_enqueue(&self, latency_sample_ms: f64) {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.enqueue_rate.fetch_add(1, Ordering::Relaxed);
        self.apply_ema(latency_sample_ms);
    }

    /// Call on every dequeue, whether from a consumer queue or on full ack
    /// completion.
    pub fn record_dequeue(&self, latency_sample_ms: f64) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.dequeue_rate.fetch_add(1, Ordering::Relaxed);
        self.apply_ema(latency_sample_ms);
    }

    fn apply_ema(&self, sample: f64) {
        let mut avg = self.avg_latency_ms.lock();
        *avg = (1.0 - EMA_ALPHA) * *avg + EMA_ALPHA * sample;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            depth: self.depth.load(Ordering::Relaxed),
            enqueue_rate: self.enqueue_rate.load(Ordering::Relaxed),
            dequeue_rate: self.dequeue_rate.load(Ordering::Relaxed),
            avg_latency_ms: *self.avg_latency_ms.lock(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn record_publish_increments_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_publish(128);
        metrics.record_publish(64);
        let snap = metrics.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.bytes, 192);
    }

    #[test]
    fn ema_blends_toward_new_samples() {
        let metrics = MetricsCollector::new();
        metrics.record_enqueue(100.0);
        let after_one = metrics.snapshot().avg_latency_ms;
        assert_eq!(after_one, 10.0);

        metrics.record_enqueue(100.0);
        let after_two = metrics.snapshot().avg_latency_ms;
        assert!(after_two > after_one);
    }

    #[test]
    fn depth_tracks_enqueue_and_dequeue() {
        let metrics = MetricsCollector::new();
        metrics.record_enqueue(5.0);
        metrics.record_enqueue(5.0);
        assert_eq!(metrics.snapshot().depth, 2);
        metrics.record_dequeue(5.0);
        assert_eq!(metrics.snapshot().depth, 1);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let metrics = MetricsCollector::new();
        metrics.record_publish(10);
        let json = serde_json::to_string(&metrics.snapshot()).expect("serialize");
        assert!(json.contains("\"published\":1"));
    }
}
