//! Backpressure-aware send path of one connection.
//!
//! Frames are queued on an unbounded channel drained by the connection's
//! writer task. The channel itself never pushes back, so admission is decided
//! here from two counters: bytes queued but not yet written, and writes
//! queued but not yet completed. Both are incremented when a frame is
//! accepted and decremented by the writer through [`Outbound::complete`].
//! A frame that does not fit is dropped, never queued for later.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tungstenite::protocol::Message as WsMessage;

use crate::config::SessionSettings;
use crate::transport::message::ServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendLimits {
    pub max_buffered_bytes: usize,
    pub max_in_flight: usize,
}

impl From<&SessionSettings> for SendLimits {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            max_buffered_bytes: settings.max_buffered_bytes,
            max_in_flight: settings.max_in_flight,
        }
    }
}

/// What happened to a frame handed to [`Outbound::send`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Closed,
    BufferFull,
    TooManyInFlight,
}

impl Delivery {
    pub fn is_sent(self) -> bool {
        self == Delivery::Sent
    }
}

#[derive(Debug)]
pub struct Outbound {
    sender: UnboundedSender<WsMessage>,
    open: AtomicBool,
    buffered_bytes: AtomicUsize,
    in_flight: AtomicUsize,
    limits: SendLimits,
}

impl Outbound {
    pub fn new(sender: UnboundedSender<WsMessage>, limits: SendLimits) -> Self {
        Self {
            sender,
            open: AtomicBool::new(true),
            buffered_bytes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            limits,
        }
    }

    /// True while frames can still reach the writer.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Stop accepting frames. Already queued frames are still written.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue `message` if the connection is open and under both ceilings.
    pub fn send(&self, message: WsMessage) -> Delivery {
        if !self.is_open() {
            return Delivery::Closed;
        }

        let buffered = self.buffered_bytes.load(Ordering::Acquire);
        if buffered >= self.limits.max_buffered_bytes {
            warn!(
                buffered,
                limit = self.limits.max_buffered_bytes,
                "outbound buffer full, dropping frame"
            );
            return Delivery::BufferFull;
        }

        let max_in_flight = self.limits.max_in_flight;
        let reserved = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_in_flight).then_some(n + 1)
            });
        if reserved.is_err() {
            warn!(limit = max_in_flight, "too many writes in flight, dropping frame");
            return Delivery::TooManyInFlight;
        }

        self.enqueue(message)
    }

    /// Serialize and [`send`](Self::send) a protocol frame.
    pub fn send_frame(&self, frame: &ServerMessage) -> Result<Delivery, serde_json::Error> {
        let text = serde_json::to_string(frame)?;
        Ok(self.send(WsMessage::text(text)))
    }

    /// Queue a transport-level ping. Pings skip both ceilings so a slow
    /// consumer is still pinged, but they are counted like any other write.
    pub fn ping(&self) -> Delivery {
        if !self.is_open() {
            return Delivery::Closed;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.enqueue(WsMessage::Ping(Default::default()))
    }

    /// Called by the writer once a queued message of `bytes` length has been
    /// written or has failed to write.
    pub fn complete(&self, bytes: usize) {
        saturating_sub(&self.in_flight, 1);
        saturating_sub(&self.buffered_bytes, bytes);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes.load(Ordering::Acquire)
    }

    pub fn limits(&self) -> SendLimits {
        self.limits
    }

    // Expects the in-flight slot to be reserved already.
    fn enqueue(&self, message: WsMessage) -> Delivery {
        let len = message.len();
        self.buffered_bytes.fetch_add(len, Ordering::AcqRel);
        if self.sender.send(message).is_err() {
            self.complete(len);
            self.close();
            return Delivery::Closed;
        }
        Delivery::Sent
    }
}

fn saturating_sub(counter: &AtomicUsize, amount: usize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        Some(n.saturating_sub(amount))
    });
}
