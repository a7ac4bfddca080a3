//! Process wiring.
//!
//! Builds the shared service objects from [`Settings`], binds the WebSocket
//! and HTTP listeners, runs the heartbeat, and tears everything down when the
//! shutdown future resolves or a listener fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::broker::{Broker, SubscriptionRegistry, TopicRegistry};
use crate::config::{HistoryBackend, Settings};
use crate::persistence::{MemoryStore, MetricsStore, SledStore};
use crate::session::SessionManager;
use crate::transport::http::{ApiState, serve_http};
use crate::transport::websocket::serve_websocket;
use crate::utils::GatewayError;

#[derive(Debug)]
pub struct Gateway {
    settings: Settings,
    manager: Arc<SessionManager>,
}

impl Gateway {
    pub fn build(settings: Settings) -> Result<Self, GatewayError> {
        settings.validate()?;
        let store: Arc<dyn MetricsStore> = match settings.history.backend {
            HistoryBackend::Memory => Arc::new(MemoryStore::new(settings.history.max_events)),
            HistoryBackend::Sled => Arc::new(SledStore::open(
                &settings.history.path,
                settings.history.max_events,
            )?),
        };
        info!(backend = ?settings.history.backend, "history store ready");

        let manager = Arc::new(SessionManager::new(
            Arc::new(TopicRegistry::new()),
            Arc::new(Broker::new()),
            Arc::new(SubscriptionRegistry::new()),
            store,
            settings.session.clone(),
        ));

        Ok(Self { settings, manager })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Serve until `shutdown` resolves or a listener fails.
    pub async fn run<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()>,
    {
        let host = &self.settings.server.host;
        let ws_listener = TcpListener::bind((host.as_str(), self.settings.server.ws_port)).await?;
        let http_listener =
            TcpListener::bind((host.as_str(), self.settings.server.http_port)).await?;
        self.run_on(ws_listener, http_listener, shutdown).await
    }

    /// Like [`run`](Self::run) on listeners bound by the caller.
    pub async fn run_on<F>(
        self,
        ws_listener: TcpListener,
        http_listener: TcpListener,
        shutdown: F,
    ) -> Result<(), GatewayError>
    where
        F: Future<Output = ()>,
    {
        let heartbeat = Duration::from_millis(self.settings.session.heartbeat_interval_ms);
        let heartbeat_task = tokio::spawn(Arc::clone(&self.manager).run_heartbeat(heartbeat));

        let api_state = ApiState {
            manager: Arc::clone(&self.manager),
            auto_create_topics: self.settings.topics.auto_create,
        };

        let result = tokio::select! {
            res = serve_websocket(ws_listener, Arc::clone(&self.manager)) => {
                error!("WebSocket server exited unexpectedly");
                res.map_err(GatewayError::from)
            }
            res = serve_http(http_listener, api_state) => {
                error!("HTTP server exited unexpectedly");
                res.map_err(GatewayError::from)
            }
            _ = shutdown => {
                info!("Shutdown signal received. Exiting gracefully.");
                Ok(())
            }
        };

        heartbeat_task.abort();
        self.manager.shutdown();
        if let Err(e) = self.manager.store().flush() {
            warn!("failed to flush history store: {e}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::Gateway;
    use crate::config::{HistoryBackend, Settings};

    #[test]
    fn build_opens_sled_backend() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.history.backend = HistoryBackend::Sled;
        settings.history.path = dir.path().join("db").to_string_lossy().into_owned();

        let gateway = Gateway::build(settings).unwrap();
        assert_eq!(gateway.manager().session_count(), 0);
    }

    #[test]
    fn build_rejects_zero_heartbeat() {
        let mut settings = Settings::default();
        settings.session.heartbeat_interval_ms = 0;
        assert!(Gateway::build(settings).is_err());
    }

    #[tokio::test]
    async fn run_serves_until_shutdown() {
        let gateway = Gateway::build(Settings::default()).unwrap();
        let manager = std::sync::Arc::clone(gateway.manager());
        manager.topics().create("orders").unwrap();

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", ws_listener.local_addr().unwrap());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(gateway.run_on(ws_listener, http_listener, async {
            let _ = stop_rx.await;
        }));

        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        client
            .send(WsMessage::Text(
                json!({"type": "subscribe", "topic": "orders", "client_id": "a"})
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
        let ack = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap();
        assert!(matches!(ack, Some(Ok(WsMessage::Text(_)))));

        stop_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(manager.broker().is_closed());
        assert_eq!(manager.session_count(), 0);
        assert_eq!(manager.subscriptions().total_subscriber_count(), 0);
    }
}
