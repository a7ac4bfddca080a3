//! Metrics and event history.
//!
//! Every ingested event is appended to a bounded, newest-first list per client
//! and kind, and folded into per-client counters. Sessions read the lists to
//! backfill `last_n` on subscribe; the HTTP API reads both.
//!
//! Two backends implement [`MetricsStore`]: [`MemoryStore`] for single-process
//! runs and tests, and [`SledStore`] which keeps history across restarts.

pub mod memory;
pub mod sled_store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::events::{CallEvent, CallStatus, SmsEvent, SmsStatus, parse_timestamp};

pub use memory::MemoryStore;
pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub trait MetricsStore: Send + Sync + fmt::Debug {
    fn record_sms(&self, event: &SmsEvent) -> Result<(), StoreError>;

    fn record_call(&self, event: &CallEvent) -> Result<(), StoreError>;

    /// Stored events for `client_id`, newest first within each list.
    fn recent_events(&self, client_id: &str) -> Result<RecentEvents, StoreError>;

    fn metrics(&self, client_id: &str) -> Result<ClientMetrics, StoreError>;

    /// Make everything recorded so far durable.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Recent events of one client, by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentEvents {
    pub sms: Vec<Value>,
    pub calls: Vec<Value>,
}

impl RecentEvents {
    /// The `n` most recent events across both categories, newest first.
    ///
    /// Ordering is by each event's `timestamp` field; events without a
    /// parseable timestamp sort after all others.
    pub fn latest(self, n: usize) -> Vec<Value> {
        let mut events: Vec<Value> = self.sms.into_iter().chain(self.calls).collect();
        events.sort_by_cached_key(|event| std::cmp::Reverse(event_time(event)));
        events.truncate(n);
        events
    }
}

fn event_time(event: &Value) -> Option<DateTime<Utc>> {
    event
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|ts| ts.with_timezone(&Utc))
}

/// Insert `event` at the head of `list`, keeping at most `max` entries.
pub(crate) fn push_bounded(list: &mut Vec<Value>, event: Value, max: usize) {
    list.insert(0, event);
    list.truncate(max);
}

/// Raw SMS counters as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsCounters {
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub sent: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SmsCounters {
    pub fn apply(&mut self, event: &SmsEvent) {
        self.total += 1;
        match event.status {
            SmsStatus::Delivered => self.delivered += 1,
            SmsStatus::Failed => self.failed += 1,
            SmsStatus::Sent => self.sent += 1,
        }
        self.last_updated = Some(Utc::now());
    }
}

/// Raw call counters as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounters {
    pub total: u64,
    pub ringing: u64,
    pub connected: u64,
    pub ended: u64,
    pub failed: u64,
    pub total_duration: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CallCounters {
    pub fn apply(&mut self, event: &CallEvent) {
        self.total += 1;
        match event.status {
            CallStatus::Ringing => self.ringing += 1,
            CallStatus::Connected => self.connected += 1,
            CallStatus::Ended => self.ended += 1,
            CallStatus::Failed => self.failed += 1,
        }
        if let Some(duration) = event.duration {
            self.total_duration = self.total_duration.saturating_add(duration);
        }
        self.last_updated = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsMetrics {
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub sent: u64,
    /// Delivered share of all SMS, in percent.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetrics {
    pub total: u64,
    pub ringing: u64,
    pub connected: u64,
    pub ended: u64,
    pub failed: u64,
    pub total_duration: u64,
    pub avg_duration: f64,
    pub active_calls: u64,
}

/// Aggregated view served by the metrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetrics {
    pub client_id: String,
    pub sms: SmsMetrics,
    pub calls: CallMetrics,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ClientMetrics {
    pub fn from_counters(client_id: &str, sms: &SmsCounters, calls: &CallCounters) -> Self {
        let success_rate = if sms.total > 0 {
            round2(sms.delivered as f64 / sms.total as f64 * 100.0)
        } else {
            0.0
        };
        let avg_duration = if calls.ended > 0 {
            round2(calls.total_duration as f64 / calls.ended as f64)
        } else {
            0.0
        };

        Self {
            client_id: client_id.to_string(),
            sms: SmsMetrics {
                total: sms.total,
                delivered: sms.delivered,
                failed: sms.failed,
                sent: sms.sent,
                success_rate,
            },
            calls: CallMetrics {
                total: calls.total,
                ringing: calls.ringing,
                connected: calls.connected,
                ended: calls.ended,
                failed: calls.failed,
                total_duration: calls.total_duration,
                avg_duration,
                active_calls: calls.connected.saturating_sub(calls.ended),
            },
            last_updated: sms.last_updated.max(calls.last_updated),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests;
