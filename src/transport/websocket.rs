//! WebSocket transport
//!
//! Accepts TCP connections, upgrades them, and hands each one to the
//! [`SessionManager`]. Every connection runs two tasks:
//! - a writer that drains the session's outbound queue into the socket and
//!   reports each completed write back to the session's [`Outbound`]
//! - the reader (this task) that feeds text frames to the manager and
//!   records pongs for the heartbeat
//!
//! The reader also waits on the session's terminate signal so the heartbeat
//! can drop a silent peer. Whichever way the connection ends, the manager's
//! close path runs exactly once.
//!
//! [`Outbound`]: crate::session::Outbound

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::session::SessionManager;
use crate::utils::GatewayError;

/// Bind `addr` and serve WebSocket clients until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    manager: Arc<SessionManager>,
) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(addr).await?;
    serve_websocket(listener, manager).await?;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve_websocket(
    listener: TcpListener,
    manager: Arc<SessionManager>,
) -> std::io::Result<()> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let manager = Arc::clone(&manager);
        spawn(async move {
            debug!(%peer, "incoming connection");
            handle_connection(stream, manager).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, manager: Arc<SessionManager>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let session = manager.open_session(tx);
    let session_id = session.id().to_string();
    info!(session = %session_id, "client connected");

    let writer = {
        let outbound = Arc::clone(session.outbound());
        let session_id = session_id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                let len = msg.len();
                let result = ws_sender.send(msg).await;
                outbound.complete(len);
                if let Err(e) = result {
                    debug!(session = %session_id, "write failed: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!(session = %session_id, "send loop closed");
        })
    };

    loop {
        let msg = tokio::select! {
            _ = session.terminated() => {
                debug!(session = %session_id, "terminated by server");
                break;
            }
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(WsMessage::Text(text))) => manager.handle_text(&session, text.as_str()),
            Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => manager.handle_text(&session, text),
                Err(_) => debug!(session = %session_id, "dropping non UTF-8 binary frame"),
            },
            Some(Ok(WsMessage::Pong(_))) => session.mark_alive(),
            // tungstenite queues the pong reply itself
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Frame(_))) => {}
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(session = %session_id, "read error: {e}");
                break;
            }
        }
    }

    manager.close_session(&session_id);
    writer.abort();
    info!(session = %session_id, "client disconnected");
}
