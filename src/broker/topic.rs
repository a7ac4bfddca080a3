//! Topic registry
//!
//! The authoritative set of topic names. Every subscribe, unsubscribe and
//! publish is checked against it before the broker is touched. Names are
//! trimmed on creation; lookups are exact.
//!
//! Concurrency note: the set sits behind a single `RwLock`, so once `delete`
//! returns every later `exists` on the same registry observes the removal.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic name must not be empty")]
    Invalid,

    #[error("topic '{0}' already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<BTreeSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic. Returns the trimmed name that was stored.
    ///
    /// Creating a name that is already present is reported, not ignored, so
    /// the admin surface can answer with a conflict.
    pub fn create(&self, name: &str) -> Result<String, TopicError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TopicError::Invalid);
        }

        let mut topics = self.topics.write();
        if !topics.insert(name.to_string()) {
            return Err(TopicError::AlreadyExists(name.to_string()));
        }
        Ok(name.to_string())
    }

    /// Remove a topic. Returns `false` when it was not registered.
    pub fn delete(&self, name: &str) -> bool {
        self.topics.write().remove(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.topics.read().contains(name)
    }

    /// All registered topic names in lexical order.
    pub fn list(&self) -> Vec<String> {
        self.topics.read().iter().cloned().collect()
    }
}
