//! CLI for eventgate
//!
//! Subcommands:
//! - `server`: run the WebSocket server and the HTTP API
//! - `client`: subscribe to a topic and print every frame (useful for smoke tests)

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

use eventgate::Gateway;
use eventgate::config::load_config;
use eventgate::utils::{GatewayError, logging};

#[derive(Parser)]
#[command(name = "eventgate")]
enum Command {
    /// Start the WebSocket server and the HTTP API
    Server,
    /// Subscribe to a topic and print incoming frames
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:4001")]
        url: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        client_id: String,
        /// Ask for this many recent events on subscribe
        #[arg(long)]
        last_n: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let _ = dotenvy::dotenv();
    let config = load_config()?;
    logging::init(&config.log.level);

    match Command::parse() {
        Command::Server => {
            let gateway = Gateway::build(config)?;
            gateway
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("failed to listen for ctrl-c: {e}");
                    }
                })
                .await
        }
        Command::Client {
            url,
            topic,
            client_id,
            last_n,
        } => run_client(&url, &topic, &client_id, last_n).await,
    }
}

async fn run_client(
    url: &str,
    topic: &str,
    client_id: &str,
    last_n: Option<usize>,
) -> Result<(), GatewayError> {
    let (mut ws_stream, _response) = connect_async(url).await?;
    info!("connected to {url}");

    let mut subscribe = json!({
        "type": "subscribe",
        "topic": topic,
        "client_id": client_id,
        "request_id": "cli-subscribe",
    });
    if let Some(n) = last_n {
        subscribe["last_n"] = json!(n);
    }
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;

    loop {
        tokio::select! {
            msg = ws_stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => println!("{}", text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = ws_stream.close(None).await;
    info!("disconnected");
    Ok(())
}
