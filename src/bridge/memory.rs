//! In-memory pub/sub for single-instance deployments and tests.

use async_trait::async_trait;

use super::{PubSub, Subscription, TopicTable};
use crate::error::BridgeError;

#[derive(Clone)]
pub struct MemoryPubSub {
    topics: TopicTable,
}

impl MemoryPubSub {
    /// `capacity` is the per-topic buffer before slow subscribers lag.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: TopicTable::new(capacity),
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError> {
        if self.topics.deliver(topic, payload) == 0 {
            // Nobody is listening; forget the topic until someone subscribes.
            self.topics.prune(topic);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BridgeError> {
        let (rx, _) = self.topics.subscribe(topic);
        Ok(Subscription::new(topic, rx, None))
    }
}
