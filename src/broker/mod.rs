//! Topic registry, fan-out broker and subscription bookkeeping.
//!
//! These are the process-wide service objects. They are created once at
//! startup and shared (behind `Arc`) with the session layer and the HTTP API.

pub mod engine;
pub mod subscription;
pub mod topic;

pub use engine::{Broker, BrokerError, Handler, HandlerError, Payload, SubscriptionHandle};
pub use subscription::{SubscriberId, SubscriptionKey, SubscriptionRegistry, TopicSummary};
pub use topic::{TopicError, TopicRegistry};
