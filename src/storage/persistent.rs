use async_trait::async_trait;

/// The out-of-core-scope collaborator contract for durable storage: a
/// key-value store keyed by message id, storing the record produced by
/// [`super::MessageStorage::flush`]. Implementations are expected to be
/// crash-durable; the broker does not retry past a single flush sweep.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn put(&self, id: u64, bytes: Vec<u8>) -> Result<(), String>;
    async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, String>;
    async fn delete(&self, id: u64) -> Result<(), String>;
}
