//! Subscription registry
//!
//! Bookkeeping of which session-owned subscriptions exist per topic. The
//! registry never unsubscribes anything itself; the session layer calls
//! `register`/`unregister` in lock-step with the real broker subscribe and
//! unsubscribe, and reads the registry for counts and for topic teardown.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::topic::TopicRegistry;

/// Identifier of the session that owns a subscription.
pub type SubscriberId = String;

/// One logical interest stream: a client id on a topic, held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub owner: SubscriberId,
    pub topic: String,
    pub client_id: String,
}

impl SubscriptionKey {
    pub fn new(
        owner: impl Into<SubscriberId>,
        topic: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            topic: topic.into(),
            client_id: client_id.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.topic, self.client_id, self.owner)
    }
}

/// A registered topic and how many subscriptions it currently has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub name: String,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<String, HashSet<SubscriptionKey>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns `false` if it was already recorded.
    pub fn register(&self, key: &SubscriptionKey) -> bool {
        self.topics
            .write()
            .entry(key.topic.clone())
            .or_default()
            .insert(key.clone())
    }

    /// Forget a subscription. Returns `false` if it was not recorded.
    pub fn unregister(&self, key: &SubscriptionKey) -> bool {
        let mut topics = self.topics.write();
        let Some(keys) = topics.get_mut(&key.topic) else {
            return false;
        };

        let removed = keys.remove(key);
        if keys.is_empty() {
            topics.remove(&key.topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, HashSet::len)
    }

    pub fn total_subscriber_count(&self) -> usize {
        self.topics.read().values().map(HashSet::len).sum()
    }

    /// Snapshot of the keys recorded for `topic`, sorted.
    pub fn keys(&self, topic: &str) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .topics
            .read()
            .get(topic)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Every registered topic with its subscription count, zero included.
    pub fn all_topics_with_subscribers(&self, registry: &TopicRegistry) -> Vec<TopicSummary> {
        let topics = self.topics.read();
        registry
            .list()
            .into_iter()
            .map(|name| {
                let subscribers = topics.get(&name).map_or(0, HashSet::len);
                TopicSummary { name, subscribers }
            })
            .collect()
    }

    /// Drop the topic's entry and hand back whatever keys were still recorded.
    pub fn clear_topic(&self, topic: &str) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .topics
            .write()
            .remove(topic)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}
