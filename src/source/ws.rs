//! WebSocket/JSON Source Adapter (spec §4.1, §6): connects to an upstream
//! WebSocket feed and treats each text frame as a JSON-encoded Normalized
//! Message.
//!
//! Grounded on `original_source/collettore/src/ingestion/websocket_client.py`
//! for the reconnect loop shape, and on the teacher's `src/ais.rs` for the
//! `tokio-tungstenite` connect/read pattern.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::model::NormalizedMessage;
use crate::source::adapter::{backoff_delay, wait_with_cancellation, ConnState, SourceConfig, SourceStats};

pub async fn run(
    config: SourceConfig,
    stats: Arc<SourceStats>,
    tx: mpsc::Sender<(NormalizedMessage, String)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            stats.set_state(ConnState::Closing);
            stats.set_state(ConnState::Disconnected);
            return;
        }

        stats.set_attempt(attempt);
        stats.set_state(ConnState::Connecting);
        match connect(&config).await {
            Ok(stream) => {
                info!(source = %config.name, endpoint = %config.endpoint, "connected to WebSocket/JSON source");
                stats.set_connected(true);
                stats.set_state(ConnState::Connected);
                stats.record_connection();
                attempt = 0;

                read_loop(&config, &stats, stream, &tx, &mut shutdown).await;

                stats.set_connected(false);
                if *shutdown.borrow() {
                    stats.set_state(ConnState::Closing);
                    stats.set_state(ConnState::Disconnected);
                    return;
                }
                stats.set_state(ConnState::Disconnected);
            }
            Err(e) => {
                error!(source = %config.name, error = %e, "WebSocket connect failed");
                stats.set_state(ConnState::Disconnected);
            }
        }

        if !config.auto_reconnect {
            warn!(source = %config.name, "auto_reconnect disabled, terminating source");
            return;
        }
        if config.max_attempts > 0 && attempt >= config.max_attempts {
            warn!(source = %config.name, attempts = attempt, "max reconnect attempts reached");
            return;
        }

        let delay = backoff_delay(config.base_interval_ms, attempt);
        stats.record_reconnect();
        attempt += 1;
        if !wait_with_cancellation(delay, &mut shutdown).await {
            stats.set_state(ConnState::Closing);
            stats.set_state(ConnState::Disconnected);
            return;
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(config: &SourceConfig) -> anyhow::Result<WsStream> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    if let Some(token) = &config.bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        request.headers_mut().insert("Authorization", value);
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn read_loop(
    config: &SourceConfig,
    stats: &Arc<SourceStats>,
    mut stream: WsStream,
    tx: &mpsc::Sender<(NormalizedMessage, String)>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            item = stream.next() => item,
            _ = shutdown.changed() => return,
        };

        match next {
            Some(Ok(WsMessage::Text(text))) => {
                stats.record_message(text.len());
                match serde_json::from_str::<NormalizedMessage>(&text) {
                    Ok(mut message) => {
                        message.source = Some(config.name.clone());
                        message.drop_sentinels();
                        if tx.send((message, config.name.clone())).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(source = %config.name, error = %e, "discarding malformed JSON frame");
                    }
                }
            }
            Some(Ok(WsMessage::Binary(bytes))) => {
                stats.record_message(bytes.len());
            }
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
            Some(Ok(WsMessage::Close(_))) => {
                debug!(source = %config.name, "remote closed WebSocket");
                return;
            }
            Some(Ok(WsMessage::Frame(_))) => {}
            Some(Err(e)) => {
                warn!(source = %config.name, error = %e, "WebSocket read error");
                return;
            }
            None => {
                debug!(source = %config.name, "WebSocket stream ended");
                return;
            }
        }
    }
}
