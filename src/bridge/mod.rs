//! Cross-instance publish/subscribe bridge.
//!
//! Every room connection subscribes to its room's topic. A payload published on
//! any instance reaches the subscribed connections of every instance, so the
//! local registry never needs to know about other processes.

pub mod behaviour;
pub mod config;
pub mod gossip;
pub mod identity;
pub mod memory;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::BridgeError;

pub use config::{BridgeBackend, BridgeConfig, GossipConfig};
pub use gossip::GossipPubSub;
pub use memory::MemoryPubSub;

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BridgeError>;
}

/// Build the topic name for a room.
pub fn room_topic(prefix: &str, room_id: &str) -> String {
    format!("{prefix}:{room_id}")
}

/// Topic carrying presence announcements between instances. Cannot collide
/// with a room topic.
pub fn presence_topic(prefix: &str) -> String {
    format!("{prefix}/presence")
}

/// Called with the topic name when a subscription is dropped.
pub(crate) type ReleaseFn = Box<dyn FnOnce(String) + Send>;

/// Live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    rx: Option<broadcast::Receiver<String>>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    pub(crate) fn new(topic: &str, rx: broadcast::Receiver<String>, release: Option<ReleaseFn>) -> Self {
        Self {
            topic: topic.to_string(),
            rx: Some(rx),
            release,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload on the topic. `Lagged` means this subscriber fell behind
    /// and payloads were skipped; `Closed` means the bridge is gone.
    pub async fn recv(&mut self) -> Result<String, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Drop the receiver first so the backend sees the updated count.
        self.rx.take();
        if let Some(release) = self.release.take() {
            release(self.topic.clone());
        }
    }
}

/// Local topic -> broadcast channel table shared by both backends.
#[derive(Clone)]
pub(crate) struct TopicTable {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl TopicTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe locally. The flag is `true` when the topic was just created.
    pub(crate) fn subscribe(&self, topic: &str) -> (broadcast::Receiver<String>, bool) {
        let mut created = false;
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                created = true;
                broadcast::channel(self.capacity).0
            })
            .subscribe();
        (rx, created)
    }

    /// Deliver to local subscribers. Returns how many received it.
    pub(crate) fn deliver(&self, topic: &str, payload: String) -> usize {
        match self.topics.get(topic) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the topic if nobody listens any more. Returns `true` if removed.
    pub(crate) fn prune(&self, topic: &str) -> bool {
        self.topics
            .remove_if(topic, |_, tx| tx.receiver_count() == 0)
            .is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_topic() {
        assert_eq!(room_topic("chat", "r-1"), "chat:r-1");
        assert_ne!(presence_topic("chat"), room_topic("chat", "presence"));
    }

    #[tokio::test]
    async fn test_topic_table_prune_only_when_unused() {
        let table = TopicTable::new(8);
        let (rx, created) = table.subscribe("t");
        assert!(created);
        let (rx2, created) = table.subscribe("t");
        assert!(!created);

        assert!(!table.prune("t"));
        drop(rx);
        assert!(!table.prune("t"));
        assert_eq!(table.deliver("t", "x".into()), 1);
        drop(rx2);
        assert!(table.prune("t"));
        assert_eq!(table.len(), 0);
        assert_eq!(table.deliver("t", "x".into()), 0);
    }
}
