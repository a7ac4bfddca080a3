//! The `transport` module is responsible for network communication.
//!
//! It defines the JSON frame protocol spoken over WebSockets, the WebSocket
//! server that feeds connections into the session layer, and the HTTP API
//! for topic administration and event ingestion.

pub mod http;
pub mod message;
pub mod websocket;

#[cfg(test)]
mod websocket_tests;
