use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::persistent::PersistentStore;

/// Reference [`PersistentStore`] implementation backed by a [`DashMap`].
/// Used by tests and by embedders that genuinely don't need durability
/// across process restarts.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<u64, Vec<u8>>,
    fail_puts: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: makes every subsequent `put` fail, to exercise the
    /// storage layer's error-channel reporting path.
    pub fn failing_on_put(self) -> Self {
        *self.fail_puts.lock() = true;
        self
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.data.contains_key(&id)
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn put(&self, id: u64, bytes: Vec<u8>) -> Result<(), String> {
        if *self.fail_puts.lock() {
            return Err("simulated put failure".to_string());
        }
        self.data.insert(id, bytes);
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, String> {
        Ok(self.data.get(&id).map(|e| e.value().clone()))
    }

    async fn delete(&self, id: u64) -> Result<(), String> {
        self.data.remove(&id);
        Ok(())
    }
}
