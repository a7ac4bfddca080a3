//! Wire protocol
//!
//! Inbound frames are parsed leniently into [`ClientMessage`] (every field
//! optional) and only then narrowed to a [`Request`]. A frame whose `type` is
//! missing or unknown, or which lacks a `topic` where one is required, yields
//! no request and is ignored, which lets older clients send frames this
//! server does not understand.
//!
//! Outbound frames are a single [`ServerMessage`] shape; absent fields are
//! omitted from the JSON. `ts` is milliseconds since the UNIX epoch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
    /// Anything other than a positive integer means no backfill.
    #[serde(default)]
    pub last_n: Option<Value>,
    /// Echoed back verbatim; clients use strings or numbers.
    #[serde(default)]
    pub request_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping {
        request_id: Option<Value>,
    },
    Subscribe {
        topic: String,
        client_id: Option<String>,
        last_n: usize,
        request_id: Option<Value>,
    },
    Unsubscribe {
        topic: String,
        client_id: Option<String>,
        request_id: Option<Value>,
    },
    Publish {
        topic: String,
        message: Option<Value>,
        request_id: Option<Value>,
    },
}

impl ClientMessage {
    /// Narrow the frame to a request, or `None` if it should be ignored.
    pub fn into_request(self) -> Option<Request> {
        let ClientMessage {
            kind,
            topic,
            client_id,
            message,
            last_n,
            request_id,
        } = self;

        match kind.as_deref()? {
            "ping" => Some(Request::Ping { request_id }),
            "subscribe" => Some(Request::Subscribe {
                topic: topic?,
                client_id,
                last_n: last_n.as_ref().map_or(0, backfill_size),
                request_id,
            }),
            "unsubscribe" => Some(Request::Unsubscribe {
                topic: topic?,
                client_id,
                request_id,
            }),
            "publish" => Some(Request::Publish {
                topic: topic?,
                message,
                request_id,
            }),
            _ => None,
        }
    }
}

fn backfill_size(raw: &Value) -> usize {
    raw.as_u64()
        .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Ack,
    Error,
    Event,
    Info,
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TopicNotFound,
    BadRequest,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub ts: i64,
}

impl ServerMessage {
    fn bare(kind: FrameKind) -> Self {
        Self {
            kind,
            topic: None,
            request_id: None,
            client_id: None,
            message: None,
            events: None,
            error: None,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn ack(topic: impl Into<String>, request_id: Option<Value>) -> Self {
        Self {
            topic: Some(topic.into()),
            request_id,
            ..Self::bare(FrameKind::Ack)
        }
    }

    pub fn error(
        topic: Option<String>,
        request_id: Option<Value>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            topic,
            request_id,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
            ..Self::bare(FrameKind::Error)
        }
    }

    /// A published payload delivered to one subscription.
    pub fn event(topic: impl Into<String>, client_id: impl Into<String>, message: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            client_id: Some(client_id.into()),
            message: Some(message),
            ..Self::bare(FrameKind::Event)
        }
    }

    /// History backfill sent after a subscribe with `last_n`.
    pub fn info(topic: impl Into<String>, request_id: Option<Value>, events: Vec<Value>) -> Self {
        Self {
            topic: Some(topic.into()),
            request_id,
            events: Some(events),
            ..Self::bare(FrameKind::Info)
        }
    }

    pub fn pong(request_id: Option<Value>) -> Self {
        Self {
            request_id,
            ..Self::bare(FrameKind::Pong)
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}
