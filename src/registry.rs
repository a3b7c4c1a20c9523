//! Named-topic directory.
//!
//! One broker instance owns one [`TopicRegistry`]: it hands out new
//! [`Topic`] handles, keeps them addressable by name, and owns the single
//! [`SchemaRegistry`] every topic validates publishes against.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::TopicConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::schema::SchemaRegistry;
use crate::storage::PersistentStore;
use crate::topic::Topic;

pub struct TopicRegistry {
    topics: DashMap<String, Arc<Topic>>,
    persistent: Arc<dyn PersistentStore>,
    schema: Arc<SchemaRegistry>,
}

impl TopicRegistry {
    pub fn new(persistent: Arc<dyn PersistentStore>) -> Self {
        Self {
            topics: DashMap::new(),
            persistent,
            schema: Arc::new(SchemaRegistry::new()),
        }
    }

    pub fn schema_registry(&self) -> Arc<SchemaRegistry> {
        self.schema.clone()
    }

    /// Creates a new topic under `name`, persisted through the registry's
    /// shared store. Each topic gets its own background workers.
    pub fn create_topic(&self, name: impl Into<String>, config: TopicConfig) -> BrokerResult<Arc<Topic>> {
        let name = name.into();
        if self.topics.contains_key(&name) {
            return Err(BrokerError::already_exists(name));
        }
        let topic = Topic::new(name.clone(), config, self.persistent.clone(), self.schema.clone())?;
        self.topics.insert(name, topic.clone());
        Ok(topic)
    }

    pub fn get_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name).map(|r| r.clone())
    }

    /// Removes a topic from the registry, dropping its last strong
    /// reference. Its background workers abort via `Topic`'s `Drop` impl
    /// once any other outstanding `Arc<Topic>` handles are released.
    pub fn delete_topic(&self, name: &str) -> bool {
        self.topics.remove(name).is_some()
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
