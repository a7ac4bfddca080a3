use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{Db, IVec, Transactional, Tree};
use tracing::warn;

use super::{
    CallCounters, ClientMetrics, MetricsStore, RecentEvents, SmsCounters, StoreError, push_bounded,
};
use crate::events::{CallEvent, EventKind, SmsEvent};

const EVENTS_TREE: &str = "events";
const COUNTERS_TREE: &str = "metrics";

/// History store backed by an embedded sled database.
///
/// Layout, one JSON document per key:
/// - tree `events`:  `events:{client}:{sms|call}`  → newest-first array of events
/// - tree `metrics`: `metrics:{client}:{sms|call}` → counters
///
/// Recording an event updates both trees in one transaction, so history and
/// counters never disagree.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    events: Tree,
    counters: Tree,
    max_events: usize,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, max_events: usize) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db, max_events)
    }

    fn from_db(db: Db, max_events: usize) -> Result<Self, StoreError> {
        let events = db.open_tree(EVENTS_TREE)?;
        let counters = db.open_tree(COUNTERS_TREE)?;
        Ok(Self {
            db,
            events,
            counters,
            max_events,
        })
    }

    /// Fold `event` into the counters and prepend it to the history list.
    fn record<C, F>(
        &self,
        client_id: &str,
        kind: EventKind,
        event: Value,
        update: F,
    ) -> Result<(), StoreError>
    where
        C: Default + Serialize + DeserializeOwned,
        F: Fn(&mut C),
    {
        let events_key = events_key(client_id, kind);
        let counters_key = counters_key(client_id, kind);

        let result: TransactionResult<(), StoreError> =
            (&self.events, &self.counters).transaction(|(events, counters)| {
                let mut counts: C =
                    decode(counters.get(counters_key.as_bytes())?, &counters_key).unwrap_or_default();
                update(&mut counts);

                let mut list: Vec<Value> =
                    decode(events.get(events_key.as_bytes())?, &events_key).unwrap_or_default();
                push_bounded(&mut list, event.clone(), self.max_events);

                counters.insert(counters_key.as_bytes(), encode(&counts)?)?;
                events.insert(events_key.as_bytes(), encode(&list)?)?;
                Ok(())
            });

        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e),
        })
    }

    fn read_json<T: DeserializeOwned>(&self, tree: &Tree, key: &str) -> Result<Option<T>, StoreError> {
        Ok(decode(tree.get(key.as_bytes())?, key))
    }
}

/// A value that no longer decodes is logged and treated as absent so one
/// corrupt entry cannot wedge a client.
fn decode<T: DeserializeOwned>(raw: Option<IVec>, key: &str) -> Option<T> {
    let raw = raw?;
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "discarding undecodable history entry");
            None
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ConflictableTransactionError<StoreError>> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))
}

fn events_key(client_id: &str, kind: EventKind) -> String {
    format!("events:{client_id}:{kind}")
}

fn counters_key(client_id: &str, kind: EventKind) -> String {
    format!("metrics:{client_id}:{kind}")
}

impl MetricsStore for SledStore {
    fn record_sms(&self, event: &SmsEvent) -> Result<(), StoreError> {
        let value = serde_json::to_value(event)?;
        self.record(&event.client_id, EventKind::Sms, value, |c: &mut SmsCounters| {
            c.apply(event)
        })
    }

    fn record_call(&self, event: &CallEvent) -> Result<(), StoreError> {
        let value = serde_json::to_value(event)?;
        self.record(&event.client_id, EventKind::Call, value, |c: &mut CallCounters| {
            c.apply(event)
        })
    }

    fn recent_events(&self, client_id: &str) -> Result<RecentEvents, StoreError> {
        Ok(RecentEvents {
            sms: self
                .read_json(&self.events, &events_key(client_id, EventKind::Sms))?
                .unwrap_or_default(),
            calls: self
                .read_json(&self.events, &events_key(client_id, EventKind::Call))?
                .unwrap_or_default(),
        })
    }

    fn metrics(&self, client_id: &str) -> Result<ClientMetrics, StoreError> {
        let sms: SmsCounters = self
            .read_json(&self.counters, &counters_key(client_id, EventKind::Sms))?
            .unwrap_or_default();
        let calls: CallCounters = self
            .read_json(&self.counters, &counters_key(client_id, EventKind::Call))?
            .unwrap_or_default();
        Ok(ClientMetrics::from_counters(client_id, &sms, &calls))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("max_events", &self.max_events)
            .finish()
    }
}
