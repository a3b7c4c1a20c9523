// Layer 1: standard library imports
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

/// Consistent-hash ring mapping arbitrary keys to a stable set of consumers.
///
/// Each consumer occupies `replicas` virtual nodes, hashed as `"<id>-<i>"`,
/// which spreads its ownership around the ring and keeps rebalancing
/// (inserting/removing one consumer) from moving every key at once.
pub struct HashRing {
    replicas: usize,
    nodes: BTreeMap<u64, u64>,
    members: HashSet<u64>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            nodes: BTreeMap::new(),
            members: HashSet::new(),
        }
    }

    pub fn insert(&mut self, consumer_id: u64) {
        for i in 0..self.replicas {
            let hash = hash_of(&format!("{consumer_id}-{i}"));
            self.nodes.insert(hash, consumer_id);
        }
        self.members.insert(consumer_id);
    }

    pub fn remove(&mut self, consumer_id: u64) {
        for i in 0..self.replicas {
            let hash = hash_of(&format!("{consumer_id}-{i}"));
            if self.nodes.get(&hash) == Some(&consumer_id) {
                self.nodes.remove(&hash);
            }
        }
        self.members.remove(&consumer_id);
    }

    pub fn contains(&self, consumer_id: u64) -> bool {
        self.members.contains(&consumer_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Walk the ring starting from the first hash `>= H(key)`, wrapping
    /// around, yielding each distinct consumer exactly once in ring order.
    pub fn walk(&self, key: &str) -> Vec<u64> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let start = hash_of(key);
        let head = self.nodes.range(start..).map(|(_, v)| *v);
        let wrapped = self.nodes.range(..start).map(|(_, v)| *v);

        let mut seen = HashSet::with_capacity(self.members.len());
        let mut order = Vec::with_capacity(self.members.len());
        for consumer_id in head.chain(wrapped) {
            if seen.insert(consumer_id) {
                order.push(consumer_id);
            }
        }
        order
    }
}

fn hash_of(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_visits_every_member_exactly_once() {
        let mut ring = HashRing::new(3);
        ring.insert(1);
        ring.insert(2);
        ring.insert(3);

        let order = ring.walk("user-42");
        let unique: HashSet<u64> = order.iter().copied().collect();
        assert_eq!(order.len(), 3);
        assert_eq!(unique, [1, 2, 3].into_iter().collect());
    }

    #[test]
    fn same_key_always_starts_at_same_consumer() {
        let mut ring = HashRing::new(3);
        ring.insert(1);
        ring.insert(2);
        ring.insert(3);

        let first = ring.walk("stable-key")[0];
        let second = ring.walk("stable-key")[0];
        assert_eq!(first, second);
    }

    #[test]
    fn removing_and_readding_yields_same_membership() {
        let mut ring = HashRing::new(3);
        ring.insert(1);
        ring.insert(2);
        let before = ring.walk("k");

        ring.remove(1);
        ring.insert(1);
        let after = ring.walk("k");

        assert_eq!(
            before.iter().copied().collect::<HashSet<_>>(),
            after.iter().copied().collect::<HashSet<_>>()
        );
    }

    #[test]
    fn empty_ring_walk_returns_nothing() {
        let ring = HashRing::new(3);
        assert!(ring.walk("anything").is_empty());
    }
}
