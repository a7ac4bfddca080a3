use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::outbound::Outbound;
use crate::broker::{SubscriberId, SubscriptionHandle, SubscriptionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Open,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Per-connection state: lifecycle, liveness, the send path and the
/// subscriptions this connection owns.
///
/// Only the owning session ever unsubscribes a handle stored here; the
/// manager reaches them through [`Session::remove_subscription`],
/// [`Session::remove_topic`] and [`Session::drain_subscriptions`].
#[derive(Debug)]
pub struct Session {
    id: SubscriberId,
    state: AtomicU8,
    alive: AtomicBool,
    outbound: Arc<Outbound>,
    subscriptions: Mutex<HashMap<SubscriptionKey, SubscriptionHandle>>,
    terminate: Notify,
}

impl Session {
    pub fn new(outbound: Arc<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: AtomicU8::new(SessionState::Open as u8),
            alive: AtomicBool::new(true),
            outbound,
            subscriptions: Mutex::new(HashMap::new()),
            terminate: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    /// Record that the peer answered a ping.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Key this session uses for `client_id` on `topic`.
    pub fn key(&self, topic: &str, client_id: &str) -> SubscriptionKey {
        SubscriptionKey::new(self.id.clone(), topic, client_id)
    }

    pub fn holds(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions.lock().contains_key(key)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Returns `false` (and keeps the existing handle) if `key` is already held.
    pub(crate) fn insert_subscription(
        &self,
        key: SubscriptionKey,
        handle: SubscriptionHandle,
    ) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&key) {
            return false;
        }
        subscriptions.insert(key, handle);
        true
    }

    pub(crate) fn remove_subscription(&self, key: &SubscriptionKey) -> Option<SubscriptionHandle> {
        self.subscriptions.lock().remove(key)
    }

    /// Remove every subscription on `topic`, whatever its client id.
    pub(crate) fn remove_topic(&self, topic: &str) -> Vec<(SubscriptionKey, SubscriptionHandle)> {
        let mut subscriptions = self.subscriptions.lock();
        let keys: Vec<SubscriptionKey> = subscriptions
            .keys()
            .filter(|key| key.topic == topic)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| subscriptions.remove(&key).map(|handle| (key, handle)))
            .collect()
    }

    pub(crate) fn drain_subscriptions(&self) -> Vec<(SubscriptionKey, SubscriptionHandle)> {
        self.subscriptions.lock().drain().collect()
    }

    /// Move from `Open` to `Closing`. Returns `false` if the session was
    /// already closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        let began = self
            .state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        self.outbound.close();
        began
    }

    pub(crate) fn finish_close(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Ask the transport task to drop the connection.
    pub fn terminate(&self) {
        self.outbound.close();
        self.terminate.notify_one();
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        self.terminate.notified().await;
    }
}
