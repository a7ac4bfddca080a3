//! Ingested event types.
//!
//! Producers post SMS and call status changes. Both carry the client id they
//! belong to and an RFC 3339 timestamp; the JSON shape is camelCase.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsStatus {
    Delivered,
    Failed,
    Sent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Connected,
    Ringing,
    Ended,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsEvent {
    pub client_id: String,
    pub message_id: String,
    pub status: SmsStatus,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub client_id: String,
    pub call_id: String,
    pub status: CallStatus,
    /// Call length in seconds, usually present once the call has ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub timestamp: String,
}

/// Which stream an event belongs to. Also the last segment of its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Sms,
    Call,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Sms => "sms",
            EventKind::Call => "call",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid event payload: {0}")]
    Malformed(String),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("field 'timestamp' is not an RFC 3339 date: {0}")]
    Timestamp(String),
}

/// Topic that events of `kind` for `client_id` are published to.
pub fn topic_for(client_id: &str, kind: EventKind) -> String {
    format!("client:{client_id}:{kind}")
}

/// Parses an event timestamp. `None` when it is not RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

impl SmsEvent {
    pub fn parse(value: Value) -> Result<Self, ValidationError> {
        let event: Self =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        require("clientId", &event.client_id)?;
        require("messageId", &event.message_id)?;
        require_timestamp(&event.timestamp)?;
        Ok(event)
    }

    pub fn topic(&self) -> String {
        topic_for(&self.client_id, EventKind::Sms)
    }
}

impl CallEvent {
    pub fn parse(value: Value) -> Result<Self, ValidationError> {
        let event: Self =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        require("clientId", &event.client_id)?;
        require("callId", &event.call_id)?;
        require_timestamp(&event.timestamp)?;
        Ok(event)
    }

    pub fn topic(&self) -> String {
        topic_for(&self.client_id, EventKind::Call)
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(())
}

fn require_timestamp(raw: &str) -> Result<(), ValidationError> {
    parse_timestamp(raw)
        .map(|_| ())
        .ok_or_else(|| ValidationError::Timestamp(raw.to_string()))
}

#[cfg(test)]
mod tests;
