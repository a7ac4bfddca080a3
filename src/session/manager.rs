//! Session manager
//!
//! Owns every open [`Session`] and runs the protocol on their behalf:
//! - dispatches inbound frames to subscribe / unsubscribe / publish / ping
//! - keeps broker handlers, the subscription registry and each session's
//!   own map in step
//! - cascades topic deletion to the subscriptions on that topic
//! - sweeps sessions for liveness on the heartbeat interval
//!
//! Locking: subscribe, unsubscribe, session close and topic deletion all run
//! under `lifecycle`. A delete racing a subscribe therefore either makes the
//! subscribe see an unknown topic, or sees and revokes the new subscription.
//! Publish does not take the lifecycle lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::connection::Session;
use super::outbound::{Delivery, Outbound, SendLimits};
use crate::broker::{
    Broker, Handler, HandlerError, Payload, SubscriberId, SubscriptionRegistry, TopicRegistry,
    TopicSummary,
};
use crate::config::SessionSettings;
use crate::persistence::MetricsStore;
use crate::transport::message::{ClientMessage, ErrorCode, Request, ServerMessage};

enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
    UnknownTopic,
    SessionClosing,
}

enum UnsubscribeOutcome {
    Removed,
    NotHeld,
    UnknownTopic,
}

#[derive(Debug)]
pub struct SessionManager {
    topics: Arc<TopicRegistry>,
    broker: Arc<Broker>,
    subscriptions: Arc<SubscriptionRegistry>,
    store: Arc<dyn MetricsStore>,
    settings: SessionSettings,
    sessions: RwLock<HashMap<SubscriberId, Arc<Session>>>,
    lifecycle: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        topics: Arc<TopicRegistry>,
        broker: Arc<Broker>,
        subscriptions: Arc<SubscriptionRegistry>,
        store: Arc<dyn MetricsStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            topics,
            broker,
            subscriptions,
            store,
            settings,
            sessions: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.topics
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Create and register a session whose frames go to `sender`.
    pub fn open_session(&self, sender: UnboundedSender<WsMessage>) -> Arc<Session> {
        let outbound = Arc::new(Outbound::new(sender, SendLimits::from(&self.settings)));
        let session = Arc::new(Session::new(outbound));
        self.sessions
            .write()
            .insert(session.id().to_string(), Arc::clone(&session));
        debug!(session = %session.id(), "session registered");
        session
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn topic_summaries(&self) -> Vec<TopicSummary> {
        self.subscriptions.all_topics_with_subscribers(&self.topics)
    }

    /// Parse and handle one inbound text frame.
    ///
    /// Unparseable input is logged and dropped; it never closes the session.
    pub fn handle_text(&self, session: &Arc<Session>, text: &str) {
        let frame: ClientMessage = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    session = %session.id(),
                    error = %e,
                    frame = %text.chars().take(100).collect::<String>(),
                    "dropping malformed frame"
                );
                return;
            }
        };

        match frame.into_request() {
            Some(request) => self.handle_request(session, request),
            None => debug!(session = %session.id(), "ignoring frame without a known type or topic"),
        }
    }

    pub fn handle_request(&self, session: &Arc<Session>, request: Request) {
        match request {
            Request::Ping { request_id } => self.reply(session, ServerMessage::pong(request_id)),
            Request::Subscribe {
                topic,
                client_id,
                last_n,
                request_id,
            } => self.subscribe(session, topic, client_id, last_n, request_id),
            Request::Unsubscribe {
                topic,
                client_id,
                request_id,
            } => self.unsubscribe(session, topic, client_id, request_id),
            Request::Publish {
                topic,
                message,
                request_id,
            } => self.publish(session, topic, message, request_id),
        }
    }

    fn subscribe(
        &self,
        session: &Arc<Session>,
        topic: String,
        client_id: Option<String>,
        last_n: usize,
        request_id: Option<Value>,
    ) {
        let Some(client_id) = non_empty(client_id) else {
            return self.reply(
                session,
                ServerMessage::error(
                    Some(topic),
                    request_id,
                    ErrorCode::BadRequest,
                    "client_id is required",
                ),
            );
        };

        let key = session.key(&topic, &client_id);
        let outcome = {
            let _lifecycle = self.lifecycle.lock();
            if !self.topics.exists(&topic) {
                SubscribeOutcome::UnknownTopic
            } else if !session.is_open() {
                SubscribeOutcome::SessionClosing
            } else if session.holds(&key) {
                SubscribeOutcome::AlreadySubscribed
            } else {
                let handler = event_forwarder(session.outbound(), &topic, &client_id);
                let handle = self.broker.subscribe(&topic, handler);
                session.insert_subscription(key.clone(), handle);
                self.subscriptions.register(&key);
                SubscribeOutcome::Subscribed
            }
        };

        match outcome {
            SubscribeOutcome::Subscribed => {
                info!(session = %session.id(), %topic, client = %client_id, "subscribed");
                self.reply(session, ServerMessage::ack(topic.clone(), request_id.clone()));
                if last_n > 0 {
                    self.send_history(session, topic, client_id, last_n, request_id);
                }
            }
            SubscribeOutcome::AlreadySubscribed => {
                debug!(session = %session.id(), %topic, client = %client_id, "already subscribed");
            }
            SubscribeOutcome::UnknownTopic => self.reply(session, topic_not_found(topic, request_id)),
            SubscribeOutcome::SessionClosing => {}
        }
    }

    /// Backfill up to `last_n` recent events for `client_id` as an `info`
    /// frame. Runs on the blocking pool; failures are logged only.
    fn send_history(
        &self,
        session: &Arc<Session>,
        topic: String,
        client_id: String,
        last_n: usize,
        request_id: Option<Value>,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session = %session.id(), "no runtime available, skipping history backfill");
            return;
        };

        let store = Arc::clone(&self.store);
        let outbound = Arc::clone(session.outbound());
        let session_id = session.id().to_string();
        runtime.spawn_blocking(move || {
            let events = match store.recent_events(&client_id) {
                Ok(recent) => recent.latest(last_n),
                Err(e) => {
                    warn!(session = %session_id, client = %client_id, error = %e, "history fetch failed");
                    return;
                }
            };
            let count = events.len();
            match outbound.send_frame(&ServerMessage::info(topic, request_id, events)) {
                Ok(Delivery::Sent) => {
                    debug!(session = %session_id, client = %client_id, count, "history sent")
                }
                Ok(delivery) => {
                    debug!(session = %session_id, ?delivery, "history frame dropped")
                }
                Err(e) => error!(session = %session_id, error = %e, "failed to encode history"),
            }
        });
    }

    fn unsubscribe(
        &self,
        session: &Arc<Session>,
        topic: String,
        client_id: Option<String>,
        request_id: Option<Value>,
    ) {
        let Some(client_id) = non_empty(client_id) else {
            return self.reply(
                session,
                ServerMessage::error(
                    Some(topic),
                    request_id,
                    ErrorCode::BadRequest,
                    "client_id is required",
                ),
            );
        };

        let key = session.key(&topic, &client_id);
        let outcome = {
            let _lifecycle = self.lifecycle.lock();
            if !self.topics.exists(&topic) {
                UnsubscribeOutcome::UnknownTopic
            } else {
                match session.remove_subscription(&key) {
                    Some(handle) => {
                        self.broker.unsubscribe(&handle);
                        self.subscriptions.unregister(&key);
                        UnsubscribeOutcome::Removed
                    }
                    None => UnsubscribeOutcome::NotHeld,
                }
            }
        };

        match outcome {
            UnsubscribeOutcome::Removed => {
                info!(session = %session.id(), %topic, client = %client_id, "unsubscribed");
                self.reply(session, ServerMessage::ack(topic, request_id));
            }
            UnsubscribeOutcome::NotHeld => {
                debug!(session = %session.id(), %topic, client = %client_id, "unsubscribe of unheld subscription");
            }
            UnsubscribeOutcome::UnknownTopic => {
                self.reply(session, topic_not_found(topic, request_id))
            }
        }
    }

    fn publish(
        &self,
        session: &Arc<Session>,
        topic: String,
        message: Option<Value>,
        request_id: Option<Value>,
    ) {
        let Some(message) = message.filter(|m| !is_empty_message(m)) else {
            return self.reply(
                session,
                ServerMessage::error(
                    Some(topic),
                    request_id,
                    ErrorCode::BadRequest,
                    "message is required",
                ),
            );
        };
        if !self.topics.exists(&topic) {
            return self.reply(session, topic_not_found(topic, request_id));
        }

        match self.broker.publish(&topic, &message) {
            Ok(delivered) => {
                debug!(session = %session.id(), %topic, delivered, "published");
                self.reply(session, ServerMessage::ack(topic, request_id));
            }
            Err(e) => {
                error!(session = %session.id(), %topic, error = %e, "publish failed");
                self.reply(
                    session,
                    ServerMessage::error(
                        Some(topic),
                        request_id,
                        ErrorCode::InternalError,
                        "publish failed",
                    ),
                );
            }
        }
    }

    fn reply(&self, session: &Session, frame: ServerMessage) {
        match session.outbound().send_frame(&frame) {
            Ok(Delivery::Sent) => {}
            Ok(delivery) => debug!(session = %session.id(), ?delivery, "reply dropped"),
            Err(e) => error!(session = %session.id(), error = %e, "failed to encode reply"),
        }
    }

    /// Run the close path for session `id`: release every subscription it
    /// owns and forget it. Returns `false` if the session was already gone.
    pub fn close_session(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        session.begin_close();

        let released = {
            let _lifecycle = self.lifecycle.lock();
            let owned = session.drain_subscriptions();
            for (key, handle) in &owned {
                if !self.broker.unsubscribe(handle) {
                    warn!(session = %id, subscription = %key, "handler was already removed");
                }
                self.subscriptions.unregister(key);
            }
            owned.len()
        };

        session.finish_close();
        info!(session = %id, released, "session closed");
        true
    }

    /// Delete a topic after revoking every subscription on it.
    ///
    /// Returns `false` when the topic was not registered.
    pub fn delete_topic(&self, name: &str) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if !self.topics.exists(name) {
            return false;
        }

        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let mut revoked = 0;
        for session in sessions {
            for (key, handle) in session.remove_topic(name) {
                self.broker.unsubscribe(&handle);
                self.subscriptions.unregister(&key);
                revoked += 1;
            }
        }

        // Keys left over belong to sessions that have already gone away.
        let stale = self.subscriptions.clear_topic(name);
        if !stale.is_empty() {
            debug!(topic = name, stale = stale.len(), "cleared stale subscription keys");
        }

        self.topics.delete(name);
        info!(topic = name, revoked, "topic deleted");
        true
    }

    /// One heartbeat pass. Sessions that did not answer the previous ping are
    /// terminated and closed; the rest are pinged again.
    ///
    /// Returns the ids of the sessions that were terminated.
    pub fn sweep(&self) -> Vec<SubscriberId> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let mut terminated = Vec::new();

        for session in sessions {
            if !session.is_open() {
                continue;
            }
            if session.take_alive() {
                if !session.outbound().ping().is_sent() {
                    debug!(session = %session.id(), "heartbeat ping not queued");
                }
            } else {
                warn!(session = %session.id(), "no pong since last heartbeat, terminating");
                session.terminate();
                self.close_session(session.id());
                terminated.push(session.id().to_string());
            }
        }
        terminated
    }

    /// Sweep forever on `period`. The first sweep happens one period after start.
    pub async fn run_heartbeat(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let terminated = self.sweep();
            if !terminated.is_empty() {
                info!(count = terminated.len(), "reaped unresponsive sessions");
            }
        }
    }

    /// Stop the broker and close every session.
    pub fn shutdown(&self) {
        self.broker.shutdown();
        let ids: Vec<SubscriberId> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            if let Some(session) = self.session(&id) {
                session.terminate();
            }
            self.close_session(&id);
        }
        info!("session manager shut down");
    }
}

/// Broker handler that forwards payloads on `topic` to one session as
/// `event` frames for `client_id`.
fn event_forwarder(outbound: &Arc<Outbound>, topic: &str, client_id: &str) -> Handler {
    let outbound = Arc::clone(outbound);
    let topic = topic.to_string();
    let client_id = client_id.to_string();
    Arc::new(
        move |_: &str, payload: &Payload| -> Result<(), HandlerError> {
            let frame = ServerMessage::event(topic.as_str(), client_id.as_str(), payload.clone());
            // Drops are already logged by the outbound; they are not handler failures.
            let _ = outbound.send_frame(&frame)?;
            Ok(())
        },
    )
}

fn topic_not_found(topic: String, request_id: Option<Value>) -> ServerMessage {
    let message = format!("topic '{topic}' does not exist");
    ServerMessage::error(Some(topic), request_id, ErrorCode::TopicNotFound, message)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Null, empty strings and empty containers count as no message.
fn is_empty_message(message: &Value) -> bool {
    match message {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}
