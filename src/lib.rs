//! # eventgate
//!
//! `eventgate` is a real-time event gateway. Producers post SMS and call
//! events over HTTP; WebSocket clients subscribe to topics and receive every
//! payload published on them, optionally preceded by recent history.
//!
//! ## Core Modules
//!
//! - `broker`: topic registry, in-process fan-out broker and subscription bookkeeping.
//! - `session`: per-connection sessions, backpressure and the protocol state machine.
//! - `transport`: the WebSocket server, the HTTP API and the wire protocol.
//! - `events`: ingested event types and their validation.
//! - `persistence`: bounded event history and per-client metrics (memory or sled).
//! - `config`: layered configuration loading.
//! - `gateway`: wires the above together and runs the listeners.
//! - `utils`: process-level errors and logging.

pub mod broker;
pub mod config;
pub mod events;
pub mod gateway;
pub mod persistence;
pub mod session;
pub mod transport;
pub mod utils;

pub use gateway::Gateway;
