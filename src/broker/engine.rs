//! Broker engine
//!
//! In-process fan-out. The broker maps a topic key to the handlers registered
//! under it and calls them synchronously on publish. It has no notion of
//! sessions or of topic legality; both are enforced one layer up.
//!
//! Concurrency and usage notes:
//! - Handlers are cloned out of the map before they are invoked, so a handler
//!   may subscribe or unsubscribe without deadlocking the broker.
//! - A handler that returns an error or panics is logged and skipped; the
//!   remaining handlers for that publish still run.
//! - Unsubscribing goes through an explicit `SubscriptionHandle`. The first
//!   call removes exactly that handler, later calls are no-ops.
//! - A topic entry is dropped as soon as its last handler is removed.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error};

/// Published payloads are arbitrary JSON documents.
pub type Payload = serde_json::Value;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with the topic and payload of every publish on the topic
/// it was registered under.
pub type Handler = Arc<dyn Fn(&str, &Payload) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is shut down")]
    Closed,
}

/// Identifies one handler registration. Returned by [`Broker::subscribe`] and
/// handed back to [`Broker::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct Broker {
    topics: RwLock<HashMap<String, HashMap<u64, Handler>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("topics", &self.topic_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register `handler` under `topic`, creating the topic entry on first use.
    pub fn subscribe(&self, topic: &str, handler: Handler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(id, handler);

        debug!(topic, handler = id, "handler registered");
        SubscriptionHandle {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove the handler behind `handle`.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut topics = self.topics.write();
        let Some(handlers) = topics.get_mut(&handle.topic) else {
            return false;
        };

        let removed = handlers.remove(&handle.id).is_some();
        if handlers.is_empty() {
            topics.remove(&handle.topic);
        }
        if removed {
            debug!(topic = %handle.topic, handler = handle.id, "handler removed");
        }
        removed
    }

    /// Deliver `payload` to every handler on `topic`.
    ///
    /// Returns how many handlers completed without error. A topic with no
    /// handlers is a successful no-op.
    pub fn publish(&self, topic: &str, payload: &Payload) -> Result<usize, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let handlers: Vec<(u64, Handler)> = match self.topics.read().get(topic) {
            Some(handlers) => handlers
                .iter()
                .map(|(id, handler)| (*id, Arc::clone(handler)))
                .collect(),
            None => {
                debug!(topic, "publish with no handlers");
                return Ok(0);
            }
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| (*handler)(topic, payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => error!(topic, handler = id, error = %e, "handler failed"),
                Err(_) => error!(topic, handler = id, "handler panicked"),
            }
        }
        Ok(delivered)
    }

    /// Refuse further publishes and drop every registered handler.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.topics.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of topics with at least one handler.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, HashMap::len)
    }
}
