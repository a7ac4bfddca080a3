//! Per-connection sessions and the manager that runs the protocol for them.

pub mod connection;
pub mod manager;
pub mod outbound;

pub use connection::{Session, SessionState};
pub use manager::SessionManager;
pub use outbound::{Delivery, Outbound, SendLimits};
