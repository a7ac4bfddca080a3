use serde_json::json;
use tempfile::tempdir;

use super::{MemoryStore, MetricsStore, RecentEvents, SledStore};
use crate::events::{CallEvent, CallStatus, SmsEvent, SmsStatus};

fn sms(client: &str, id: &str, status: SmsStatus, ts: &str) -> SmsEvent {
    SmsEvent {
        client_id: client.to_string(),
        message_id: id.to_string(),
        status,
        timestamp: ts.to_string(),
    }
}

fn call(client: &str, id: &str, status: CallStatus, duration: Option<u64>, ts: &str) -> CallEvent {
    CallEvent {
        client_id: client.to_string(),
        call_id: id.to_string(),
        status,
        duration,
        timestamp: ts.to_string(),
    }
}

fn exercise_history(store: &dyn MetricsStore) {
    store
        .record_sms(&sms("A", "m1", SmsStatus::Sent, "2025-01-01T10:00:00Z"))
        .unwrap();
    store
        .record_sms(&sms("A", "m2", SmsStatus::Delivered, "2025-01-01T10:01:00Z"))
        .unwrap();
    store
        .record_call(&call("A", "c1", CallStatus::Ringing, None, "2025-01-01T10:02:00Z"))
        .unwrap();
    store
        .record_sms(&sms("B", "m3", SmsStatus::Failed, "2025-01-01T10:03:00Z"))
        .unwrap();

    let recent = store.recent_events("A").unwrap();
    assert_eq!(recent.sms.len(), 2);
    assert_eq!(recent.sms[0]["messageId"], "m2");
    assert_eq!(recent.sms[1]["messageId"], "m1");
    assert_eq!(recent.calls.len(), 1);
    assert_eq!(recent.calls[0]["callId"], "c1");

    assert_eq!(store.recent_events("nobody").unwrap(), RecentEvents::default());
}

fn exercise_bounds(store: &dyn MetricsStore) {
    for i in 0..5 {
        store
            .record_sms(&sms(
                "A",
                &format!("m{i}"),
                SmsStatus::Sent,
                &format!("2025-01-01T10:0{i}:00Z"),
            ))
            .unwrap();
    }
    let recent = store.recent_events("A").unwrap();
    assert_eq!(recent.sms.len(), 3);
    assert_eq!(recent.sms[0]["messageId"], "m4");
    assert_eq!(recent.sms[2]["messageId"], "m2");

    // counters are not bounded by the list size
    assert_eq!(store.metrics("A").unwrap().sms.total, 5);
}

fn exercise_metrics(store: &dyn MetricsStore) {
    let ts = "2025-01-01T10:00:00Z";
    store.record_sms(&sms("A", "m1", SmsStatus::Delivered, ts)).unwrap();
    store.record_sms(&sms("A", "m2", SmsStatus::Delivered, ts)).unwrap();
    store.record_sms(&sms("A", "m3", SmsStatus::Failed, ts)).unwrap();

    store.record_call(&call("A", "c1", CallStatus::Connected, None, ts)).unwrap();
    store.record_call(&call("A", "c2", CallStatus::Connected, None, ts)).unwrap();
    store.record_call(&call("A", "c1", CallStatus::Ended, Some(30), ts)).unwrap();
    store.record_call(&call("A", "c3", CallStatus::Ended, Some(15), ts)).unwrap();

    let metrics = store.metrics("A").unwrap();
    assert_eq!(metrics.client_id, "A");
    assert_eq!(metrics.sms.total, 3);
    assert_eq!(metrics.sms.delivered, 2);
    assert_eq!(metrics.sms.failed, 1);
    assert_eq!(metrics.sms.success_rate, 66.67);

    assert_eq!(metrics.calls.total, 4);
    assert_eq!(metrics.calls.total_duration, 45);
    assert_eq!(metrics.calls.avg_duration, 22.5);
    assert_eq!(metrics.calls.active_calls, 0);
    assert!(metrics.last_updated.is_some());

    let empty = store.metrics("nobody").unwrap();
    assert_eq!(empty.sms.total, 0);
    assert_eq!(empty.sms.success_rate, 0.0);
    assert_eq!(empty.calls.avg_duration, 0.0);
    assert!(empty.last_updated.is_none());
}

fn exercise_duration_saturates(store: &dyn MetricsStore) {
    let ts = "2025-01-01T10:00:00Z";
    store
        .record_call(&call("A", "c1", CallStatus::Ended, Some(u64::MAX), ts))
        .unwrap();
    store
        .record_call(&call("A", "c2", CallStatus::Ended, Some(1), ts))
        .unwrap();

    let metrics = store.metrics("A").unwrap();
    assert_eq!(metrics.calls.total, 2);
    assert_eq!(metrics.calls.ended, 2);
    assert_eq!(metrics.calls.total_duration, u64::MAX);
    assert_eq!(store.recent_events("A").unwrap().calls.len(), 2);
}

fn exercise_concurrent_writers(store: &dyn MetricsStore) {
    std::thread::scope(|scope| {
        for worker in 0..4 {
            scope.spawn(move || {
                for i in 0..25 {
                    let id = format!("w{worker}-m{i}");
                    store
                        .record_sms(&sms("A", &id, SmsStatus::Sent, "2025-01-01T10:00:00Z"))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(store.recent_events("A").unwrap().sms.len(), 100);
    let metrics = store.metrics("A").unwrap();
    assert_eq!(metrics.sms.total, 100);
    assert_eq!(metrics.sms.sent, 100);
}

#[test]
fn test_memory_store_history() {
    exercise_history(&MemoryStore::new(100));
}

#[test]
fn test_memory_store_bounds_lists() {
    exercise_bounds(&MemoryStore::new(3));
}

#[test]
fn test_memory_store_metrics() {
    exercise_metrics(&MemoryStore::default());
}

#[test]
fn test_sled_store_history() {
    let dir = tempdir().unwrap();
    exercise_history(&SledStore::open(dir.path(), 100).unwrap());
}

#[test]
fn test_sled_store_bounds_lists() {
    let dir = tempdir().unwrap();
    exercise_bounds(&SledStore::open(dir.path(), 3).unwrap());
}

#[test]
fn test_sled_store_metrics() {
    let dir = tempdir().unwrap();
    exercise_metrics(&SledStore::open(dir.path(), 100).unwrap());
}

#[test]
fn test_memory_store_duration_saturates() {
    exercise_duration_saturates(&MemoryStore::default());
}

#[test]
fn test_sled_store_duration_saturates() {
    let dir = tempdir().unwrap();
    exercise_duration_saturates(&SledStore::open(dir.path(), 100).unwrap());
}

#[test]
fn test_memory_store_concurrent_writers_stay_consistent() {
    exercise_concurrent_writers(&MemoryStore::new(1000));
}

#[test]
fn test_sled_store_concurrent_writers_stay_consistent() {
    let dir = tempdir().unwrap();
    exercise_concurrent_writers(&SledStore::open(dir.path(), 1000).unwrap());
}

#[test]
fn test_sled_store_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = SledStore::open(dir.path(), 10).unwrap();
        store
            .record_sms(&sms("A", "m1", SmsStatus::Sent, "2025-01-01T10:00:00Z"))
            .unwrap();
        store.flush().unwrap();
    }

    let store = SledStore::open(dir.path(), 10).unwrap();
    assert_eq!(store.recent_events("A").unwrap().sms.len(), 1);
    assert_eq!(store.metrics("A").unwrap().sms.sent, 1);
}

#[test]
fn test_latest_merges_and_orders_by_timestamp() {
    let recent = RecentEvents {
        sms: vec![
            json!({"id": 5, "timestamp": "2025-01-01T10:05:00Z"}),
            json!({"id": 3, "timestamp": "2025-01-01T10:03:00Z"}),
            json!({"id": 1, "timestamp": "2025-01-01T10:01:00Z"}),
        ],
        calls: vec![
            json!({"id": 4, "timestamp": "2025-01-01T12:04:00+02:00"}),
            json!({"id": 2, "timestamp": "2025-01-01T10:02:00Z"}),
        ],
    };

    let ids: Vec<_> = recent.latest(3).iter().map(|e| e["id"].clone()).collect();
    assert_eq!(ids, vec![json!(5), json!(4), json!(3)]);
}

#[test]
fn test_latest_puts_undated_events_last() {
    let recent = RecentEvents {
        sms: vec![json!({"id": "undated"}), json!({"id": "dated", "timestamp": "2025-01-01T10:00:00Z"})],
        calls: vec![],
    };
    let events = recent.latest(10);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["id"], "dated");
    assert_eq!(events[1]["id"], "undated");
}
