use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use super::{
    CallCounters, ClientMetrics, MetricsStore, RecentEvents, SmsCounters, StoreError, push_bounded,
};
use crate::events::{CallEvent, SmsEvent};

#[derive(Debug, Default)]
struct ClientRecord {
    sms_events: Vec<Value>,
    call_events: Vec<Value>,
    sms: SmsCounters,
    calls: CallCounters,
}

/// Process-local store. History is lost on restart.
#[derive(Debug)]
pub struct MemoryStore {
    clients: Mutex<HashMap<String, ClientRecord>>,
    max_events: usize,
}

impl MemoryStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_events,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MetricsStore for MemoryStore {
    fn record_sms(&self, event: &SmsEvent) -> Result<(), StoreError> {
        let value = serde_json::to_value(event)?;
        let mut clients = self.clients.lock();
        let record = clients.entry(event.client_id.clone()).or_default();
        record.sms.apply(event);
        push_bounded(&mut record.sms_events, value, self.max_events);
        Ok(())
    }

    fn record_call(&self, event: &CallEvent) -> Result<(), StoreError> {
        let value = serde_json::to_value(event)?;
        let mut clients = self.clients.lock();
        let record = clients.entry(event.client_id.clone()).or_default();
        record.calls.apply(event);
        push_bounded(&mut record.call_events, value, self.max_events);
        Ok(())
    }

    fn recent_events(&self, client_id: &str) -> Result<RecentEvents, StoreError> {
        let clients = self.clients.lock();
        Ok(clients
            .get(client_id)
            .map(|record| RecentEvents {
                sms: record.sms_events.clone(),
                calls: record.call_events.clone(),
            })
            .unwrap_or_default())
    }

    fn metrics(&self, client_id: &str) -> Result<ClientMetrics, StoreError> {
        let clients = self.clients.lock();
        let metrics = match clients.get(client_id) {
            Some(record) => ClientMetrics::from_counters(client_id, &record.sms, &record.calls),
            None => ClientMetrics::from_counters(
                client_id,
                &SmsCounters::default(),
                &CallCounters::default(),
            ),
        };
        Ok(metrics)
    }
}
