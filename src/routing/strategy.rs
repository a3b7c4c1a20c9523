use std::collections::HashSet;
use std::sync::RwLock;

use dashmap::DashMap;

use super::hash_ring::HashRing;

/// Layers routing-key subscription filtering on top of a [`HashRing`].
///
/// `(binded, excluded)` results are memoized per routing key (`None` means
/// "no routing key on the message") and the whole cache is invalidated on
/// any subscription change, since a single `addEntry`/`removeEntry` can
/// change every key's answer.
pub struct RoutingStrategy {
    ring: RwLock<HashRing>,
    subscriptions: DashMap<u64, HashSet<String>>,
    cache: DashMap<Option<String>, (HashSet<u64>, HashSet<u64>)>,
}

impl RoutingStrategy {
    pub fn new(replicas: usize) -> Self {
        Self {
            ring: RwLock::new(HashRing::new(replicas)),
            subscriptions: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    pub fn add_entry(&self, consumer_id: u64, routing_keys: Option<HashSet<String>>) {
        self.ring.write().unwrap_or_else(|e| e.into_inner()).insert(consumer_id);
        match routing_keys {
            Some(keys) if !keys.is_empty() => {
                self.subscriptions.insert(consumer_id, keys);
            }
            _ => {
                self.subscriptions.remove(&consumer_id);
            }
        }
        self.cache.clear();
    }

    pub fn remove_entry(&self, consumer_id: u64) {
        self.ring.write().unwrap_or_else(|e| e.into_inner()).remove(consumer_id);
        self.subscriptions.remove(&consumer_id);
        self.cache.clear();
    }

    pub fn total_consumers(&self) -> usize {
        self.ring.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns `(binded, excluded)` for the given routing key, computing and
    /// caching the result on first request.
    pub fn get_entries(&self, routing_key: Option<&str>) -> (HashSet<u64>, HashSet<u64>) {
        let cache_key = routing_key.map(str::to_string);
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached.clone();
        }

        let mut binded = HashSet::new();
        let mut excluded = HashSet::new();
        for entry in self.subscriptions.iter() {
            let consumer_id = *entry.key();
            let keys = entry.value();
            match routing_key {
                Some(rk) if keys.contains(rk) => {
                    binded.insert(consumer_id);
                }
                _ => {
                    excluded.insert(consumer_id);
                }
            }
        }

        let result = (binded, excluded);
        self.cache.insert(cache_key, result.clone());
        result
    }

    /// Ring walk order starting at `H(correlation_id)`.
    pub fn get_correlated_entry(&self, correlation_id: &str) -> Vec<u64> {
        self.ring.read().unwrap_or_else(|e| e.into_inner()).walk(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_with_no_subscription_is_neither_binded_nor_excluded() {
        let strategy = RoutingStrategy::new(3);
        strategy.add_entry(1, None);

        let (binded, excluded) = strategy.get_entries(Some("red"));
        assert!(!binded.contains(&1));
        assert!(!excluded.contains(&1));
    }

    #[test]
    fn subscribed_consumer_is_binded_only_for_its_own_key() {
        let strategy = RoutingStrategy::new(3);
        strategy.add_entry(1, Some(["red".to_string()].into_iter().collect()));

        let (binded, _) = strategy.get_entries(Some("red"));
        assert!(binded.contains(&1));

        let (_, excluded) = strategy.get_entries(Some("blue"));
        assert!(excluded.contains(&1));
    }

    #[test]
    fn cache_is_invalidated_on_subscription_change() {
        let strategy = RoutingStrategy::new(3);
        strategy.add_entry(1, Some(["red".to_string()].into_iter().collect()));
        let _ = strategy.get_entries(Some("red"));

        strategy.add_entry(1, Some(["blue".to_string()].into_iter().collect()));
        let (binded, excluded) = strategy.get_entries(Some("red"));
        assert!(!binded.contains(&1));
        assert!(excluded.contains(&1));
    }

    #[test]
    fn remove_entry_drops_subscription_and_ring_membership() {
        let strategy = RoutingStrategy::new(3);
        strategy.add_entry(1, Some(["red".to_string()].into_iter().collect()));
        strategy.remove_entry(1);

        assert_eq!(strategy.total_consumers(), 0);
        let (binded, excluded) = strategy.get_entries(Some("red"));
        assert!(!binded.contains(&1));
        assert!(!excluded.contains(&1));
    }
}
