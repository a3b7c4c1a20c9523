//! Consistent-hash ring, routing-key filtering, and the decision logic that
//! combines them.
//!
//! Routing is kept pure and side-effect free, consistent with the pipeline's
//! processors: [`Router::route`] returns a [`RouteDecision`] describing what
//! should happen, and the topic façade performs the actual enqueue/DLQ
//! actuation. This keeps both subsystems independently testable without a
//! `QueueManager`/`DLQManager` in scope.

mod hash_ring;
mod strategy;

pub use hash_ring::HashRing;
pub use strategy::RoutingStrategy;

use std::collections::HashSet;

use crate::message::{DlqReason, MessageMetadata};

/// Default number of virtual nodes per consumer on the ring.
pub const DEFAULT_REPLICAS: usize = 3;

/// The outcome of routing a single message, before actuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Enqueue into each of these consumers, in the order given.
    Enqueue(Vec<u64>),
    /// No eligible consumer exists; divert to the DLQ.
    DeadLetter(DlqReason),
}

/// Glues [`RoutingStrategy`] (ring + routing-key filter) under the routing
/// policy described for a single topic.
pub struct Router {
    strategy: RoutingStrategy,
}

impl Router {
    pub fn new(replicas: usize) -> Self {
        Self {
            strategy: RoutingStrategy::new(replicas),
        }
    }

    pub fn add_consumer(&self, consumer_id: u64, routing_keys: Option<HashSet<String>>) {
        self.strategy.add_entry(consumer_id, routing_keys);
    }

    pub fn remove_consumer(&self, consumer_id: u64) {
        self.strategy.remove_entry(consumer_id);
    }

    pub fn total_consumers(&self) -> usize {
        self.strategy.total_consumers()
    }

    /// Implements the routing algorithm: compute the binded/excluded sets
    /// for the message's routing key, then branch on whether a
    /// `correlationId` is present.
    pub fn route(&self, meta: &MessageMetadata, active_consumers: &HashSet<u64>) -> RouteDecision {
        let total = self.strategy.total_consumers();
        if total == 0 {
            return RouteDecision::DeadLetter(DlqReason::NoConsumers);
        }

        let (binded, excluded) = self.strategy.get_entries(meta.routing_key.as_deref());
        if excluded.len() == total {
            return RouteDecision::DeadLetter(DlqReason::NoConsumers);
        }

        match &meta.correlation_id {
            None => {
                let targets: Vec<u64> = active_consumers
                    .iter()
                    .filter(|id| !excluded.contains(id))
                    .copied()
                    .collect();
                if targets.is_empty() {
                    RouteDecision::DeadLetter(DlqReason::NoConsumers)
                } else {
                    RouteDecision::Enqueue(targets)
                }
            }
            Some(correlation_id) => {
                let ring_order = self.strategy.get_correlated_entry(correlation_id);
                let mut fallback: Option<u64> = None;
                for consumer_id in &ring_order {
                    let is_excluded = excluded.contains(consumer_id);
                    let is_binded = binded.contains(consumer_id);
                    if is_binded {
                        return RouteDecision::Enqueue(vec![*consumer_id]);
                    }
                    if !is_excluded && fallback.is_none() {
                        fallback = Some(*consumer_id);
                    }
                }
                match fallback {
                    Some(consumer_id) => RouteDecision::Enqueue(vec![consumer_id]),
                    None => RouteDecision::DeadLetter(DlqReason::NoConsumers),
                }
            }
        }
    }
}
