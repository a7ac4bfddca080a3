use serde_json::json;

use super::{CallEvent, CallStatus, EventKind, SmsEvent, SmsStatus, ValidationError, topic_for};

#[test]
fn test_parse_sms_event() {
    let event = SmsEvent::parse(json!({
        "clientId": "A",
        "messageId": "m-1",
        "status": "delivered",
        "timestamp": "2025-01-01T10:00:00Z"
    }))
    .unwrap();

    assert_eq!(event.client_id, "A");
    assert_eq!(event.status, SmsStatus::Delivered);
    assert_eq!(event.topic(), "client:A:sms");
}

#[test]
fn test_parse_call_event_with_duration() {
    let event = CallEvent::parse(json!({
        "clientId": "A",
        "callId": "c-1",
        "status": "ended",
        "duration": 42,
        "timestamp": "2025-01-01T10:00:00+02:00"
    }))
    .unwrap();

    assert_eq!(event.status, CallStatus::Ended);
    assert_eq!(event.duration, Some(42));
    assert_eq!(event.topic(), "client:A:call");
}

#[test]
fn test_serialized_event_keeps_camel_case() {
    let event = CallEvent {
        client_id: "A".to_string(),
        call_id: "c-1".to_string(),
        status: CallStatus::Ringing,
        duration: None,
        timestamp: "2025-01-01T10:00:00Z".to_string(),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(
        value,
        json!({
            "clientId": "A",
            "callId": "c-1",
            "status": "ringing",
            "timestamp": "2025-01-01T10:00:00Z"
        })
    );
}

#[test]
fn test_rejects_unknown_status() {
    let err = SmsEvent::parse(json!({
        "clientId": "A",
        "messageId": "m-1",
        "status": "lost",
        "timestamp": "2025-01-01T10:00:00Z"
    }))
    .unwrap_err();
    assert!(matches!(err, ValidationError::Malformed(_)));
}

#[test]
fn test_rejects_missing_fields() {
    let err = CallEvent::parse(json!({"clientId": "A", "status": "ringing"})).unwrap_err();
    assert!(matches!(err, ValidationError::Malformed(_)));
}

#[test]
fn test_rejects_empty_ids() {
    let err = SmsEvent::parse(json!({
        "clientId": " ",
        "messageId": "m-1",
        "status": "sent",
        "timestamp": "2025-01-01T10:00:00Z"
    }))
    .unwrap_err();
    assert_eq!(err, ValidationError::EmptyField("clientId"));
}

#[test]
fn test_rejects_bad_timestamp() {
    let err = SmsEvent::parse(json!({
        "clientId": "A",
        "messageId": "m-1",
        "status": "sent",
        "timestamp": "yesterday"
    }))
    .unwrap_err();
    assert_eq!(err, ValidationError::Timestamp("yesterday".to_string()));
}

#[test]
fn test_topic_for() {
    assert_eq!(topic_for("client_A", EventKind::Sms), "client:client_A:sms");
    assert_eq!(topic_for("client_A", EventKind::Call), "client:client_A:call");
}
