//! Axum WebSocket route handlers, one per named pool (spec §6).
//!
//! Grounded on
//! `original_source/server/src/modules/websocket/websocket_server.py`'s
//! `handle_*_client` methods: upgrade, send a `connected` welcome frame,
//! loop reading (mostly to notice the client going away), disconnect on
//! exit. The teacher's `src/main.rs` shows the axum `WebSocketUpgrade`
//! extractor wiring this crate reuses.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;

use crate::bbox::BoundingBox;
use crate::fanout::PoolTag;
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
pub struct GeoQuery {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

pub async fn raw(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(runtime): State<Arc<Runtime>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, runtime, PoolTag::Raw, None, addr.ip()))
}

pub async fn all(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(runtime): State<Arc<Runtime>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, runtime, PoolTag::All, None, addr.ip()))
}

pub async fn watchlist(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(runtime): State<Arc<Runtime>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, runtime, PoolTag::Watchlist, None, addr.ip()))
}

pub async fn geo(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<GeoQuery>,
    State(runtime): State<Arc<Runtime>>,
) -> Response {
    let bbox = BoundingBox {
        min_lat: query.min_lat,
        max_lat: query.max_lat,
        min_lon: query.min_lon,
        max_lon: query.max_lon,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, runtime, PoolTag::Geo, Some(bbox), addr.ip()))
}

pub async fn geo_watchlist(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<GeoQuery>,
    State(runtime): State<Arc<Runtime>>,
) -> Response {
    let bbox = BoundingBox {
        min_lat: query.min_lat,
        max_lat: query.max_lat,
        min_lon: query.min_lon,
        max_lon: query.max_lon,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, runtime, PoolTag::GeoWatchlist, Some(bbox), addr.ip()))
}

async fn handle_socket(
    mut socket: WebSocket,
    runtime: Arc<Runtime>,
    pool_tag: PoolTag,
    bbox: Option<BoundingBox>,
    client_ip: IpAddr,
) {
    let (id, mut outbound) = match runtime.fanout.subscribe(pool_tag, client_ip, bbox) {
        Ok(pair) => pair,
        Err(e) => {
            debug!(pool = pool_tag.as_str(), client_ip = %client_ip, error = %e, "connection rejected at admission");
            let _ = socket
                .send(Message::Close(None))
                .await;
            return;
        }
    };

    let welcome = serde_json::json!({
        "type": "connected",
        "timestamp": now_rfc3339(),
        "stream": pool_tag.as_str(),
        "bounding_box": bbox.map(|b| serde_json::json!({
            "min_lat": b.min_lat,
            "max_lat": b.max_lat,
            "min_lon": b.min_lon,
            "max_lon": b.max_lon,
        })),
    })
    .to_string();
    if socket.send(Message::Text(welcome)).await.is_err() {
        runtime.fanout.unsubscribe(pool_tag, id);
        return;
    }

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = control_reply(&text) {
                            if socket.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(pool = pool_tag.as_str(), error = %e, "client read error");
                        break;
                    }
                }
            }
        }
    }

    runtime.fanout.unsubscribe(pool_tag, id);
    debug!(pool = pool_tag.as_str(), client_ip = %client_ip, "subscriber disconnected");
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Control channel (spec §4.5): `{"type":"ping"}` in, `{"type":"pong",
/// "timestamp":…}` out. Every other inbound frame is ignored.
fn control_reply(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? == "ping" {
        Some(serde_json::json!({ "type": "pong", "timestamp": now_rfc3339() }).to_string())
    } else {
        None
    }
}
