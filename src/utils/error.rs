//! Process-level errors.
//!
//! Each layer owns a narrow error enum (`TopicError`, `BrokerError`,
//! `StoreError`, `ApiError`); `GatewayError` is what startup and the binary
//! surface when something outside the request path fails.

use thiserror::Error;

use crate::persistence::StoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history store error: {0}")]
    Store(#[from] StoreError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
