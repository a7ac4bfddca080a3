use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::broker::{Broker, SubscriptionRegistry, TopicRegistry};
use crate::config::SessionSettings;
use crate::persistence::MemoryStore;
use crate::session::SessionManager;
use crate::transport::message::{ErrorCode, FrameKind, ServerMessage};
use crate::transport::websocket::serve_websocket;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server() -> (String, Arc<SessionManager>) {
    let topics = Arc::new(TopicRegistry::new());
    topics.create("orders").unwrap();
    let manager = Arc::new(SessionManager::new(
        topics,
        Arc::new(Broker::new()),
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(MemoryStore::default()),
        SessionSettings::default(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(serve_websocket(listener, Arc::clone(&manager)));
    (url, manager)
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(WsMessage::Text(frame.to_string().into()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut Client) -> ServerMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_subscribe_and_receive_published_event() {
    let (url, _manager) = start_server().await;
    let (mut subscriber, _) = connect_async(url.as_str()).await.unwrap();
    let (mut publisher, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut subscriber,
        json!({"type": "subscribe", "topic": "orders", "client_id": "s1", "request_id": "r1"}),
    )
    .await;
    let ack = next_frame(&mut subscriber).await;
    assert_eq!(ack.kind, FrameKind::Ack);
    assert_eq!(ack.request_id, Some(json!("r1")));

    send(
        &mut publisher,
        json!({"type": "publish", "topic": "orders", "message": {"id": 1}, "request_id": "r2"}),
    )
    .await;
    let ack = next_frame(&mut publisher).await;
    assert_eq!(ack.kind, FrameKind::Ack);
    assert_eq!(ack.request_id, Some(json!("r2")));

    let event = next_frame(&mut subscriber).await;
    assert_eq!(event.kind, FrameKind::Event);
    assert_eq!(event.topic.as_deref(), Some("orders"));
    assert_eq!(event.client_id.as_deref(), Some("s1"));
    assert_eq!(event.message, Some(json!({"id": 1})));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (url, _manager) = start_server().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    client
        .send(WsMessage::Text("{not json".into()))
        .await
        .unwrap();
    send(&mut client, json!({"type": "ping", "request_id": 1})).await;

    let pong = next_frame(&mut client).await;
    assert_eq!(pong.kind, FrameKind::Pong);
    assert_eq!(pong.request_id, Some(json!(1)));
}

#[tokio::test]
async fn test_unknown_topic_over_socket() {
    let (url, _manager) = start_server().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut client,
        json!({"type": "subscribe", "topic": "missing", "client_id": "s1"}),
    )
    .await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame.kind, FrameKind::Error);
    assert_eq!(frame.error_code(), Some(ErrorCode::TopicNotFound));
}

#[tokio::test]
async fn test_disconnect_releases_subscriptions() {
    let (url, manager) = start_server().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut client,
        json!({"type": "subscribe", "topic": "orders", "client_id": "s1"}),
    )
    .await;
    next_frame(&mut client).await;
    assert_eq!(manager.subscriptions().subscriber_count("orders"), 1);

    client.close(None).await.unwrap();
    drop(client);

    wait_until(|| manager.session_count() == 0).await;
    assert_eq!(manager.subscriptions().subscriber_count("orders"), 0);
    assert_eq!(manager.broker().handler_count("orders"), 0);
}

#[tokio::test]
async fn test_heartbeat_sweep_drops_silent_peer() {
    let (url, manager) = start_server().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut client,
        json!({"type": "subscribe", "topic": "orders", "client_id": "s1"}),
    )
    .await;
    next_frame(&mut client).await;

    // The client never reads again, so the ping is never answered.
    assert!(manager.sweep().is_empty());
    let terminated = manager.sweep();

    assert_eq!(terminated.len(), 1);
    assert_eq!(manager.session_count(), 0);
    assert_eq!(manager.subscriptions().subscriber_count("orders"), 0);
}
