//! Shared reconnect state machine and statistics for Source Adapters
//! (spec §4.1).
//!
//! Grounded on the reconnect loop shape common to
//! `original_source/collettore/src/ingestion/websocket_client.py` and
//! `original_source/server/src/modules/stream_ingestion/satellite_client.py`
//! — both hand-roll `connected`/`running`/`reconnect_attempts` booleans and
//! counters; SPEC_FULL §4.1 turns that into an explicit typed state machine
//! per design note §9.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

/// `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`
/// (spec §4.1). Driven by the source adapter's reconnect loop via
/// `SourceStats::set_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnState {
    fn to_u8(self) -> u8 {
        match self {
            ConnState::Disconnected => 0,
            ConnState::Connecting => 1,
            ConnState::Connected => 2,
            ConnState::Closing => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            3 => ConnState::Closing,
            _ => ConnState::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    TcpNmea,
    WebSocketJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// `host:port` for TCP/NMEA, a `ws://`/`wss://` URL for WebSocket/JSON.
    pub endpoint: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// 0 = unbounded.
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_true() -> bool {
    true
}

fn default_base_interval_ms() -> u64 {
    1000
}

/// Read-only statistics exposed for control-plane queries (spec §4.1).
pub struct SourceStats {
    connected: AtomicBool,
    state: AtomicU8,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    connection_count: AtomicU64,
    reconnect_count: AtomicU64,
    current_attempt: AtomicU32,
}

impl Default for SourceStats {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            state: AtomicU8::new(ConnState::Disconnected.to_u8()),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connection_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
            current_attempt: AtomicU32::new(0),
        }
    }
}

pub struct SourceStatsSnapshot {
    pub connected: bool,
    pub state: ConnState,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub connection_count: u64,
    pub reconnect_count: u64,
    pub current_attempt: u32,
}

impl SourceStats {
    pub fn snapshot(&self) -> SourceStatsSnapshot {
        SourceStatsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            state: self.state(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connection_count: self.connection_count.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            current_attempt: self.current_attempt.load(Ordering::Relaxed),
        }
    }

    pub fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: ConnState) {
        self.state.store(state.to_u8(), Ordering::Relaxed);
    }

    pub fn record_message(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_attempt(&self, attempt: u32) {
        self.current_attempt.store(attempt, Ordering::Relaxed);
    }
}

/// Computes the backoff wait for the given attempt number: `min(R *
/// 2^attempt, 60s)` (spec §4.1).
pub fn backoff_delay(base_interval_ms: u64, attempt: u32) -> Duration {
    let scaled = base_interval_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
    Duration::from_millis(scaled.min(60_000))
}

/// Waits out a backoff delay, honoring a shutdown signal (spec §4.1: "honor
/// a cancellation signal in every wait").
pub async fn wait_with_cancellation(delay: Duration, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

pub fn new_stats() -> Arc<SourceStats> {
    Arc::new(SourceStats::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps_at_60s() {
        assert_eq!(backoff_delay(1000, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(1000, 10), Duration::from_millis(60_000));
    }

    #[test]
    fn stats_snapshot_reflects_updates() {
        let stats = SourceStats::default();
        stats.set_connected(true);
        stats.record_message(128);
        stats.record_connection();
        stats.record_reconnect();
        stats.set_attempt(3);

        let snap = stats.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.bytes_received, 128);
        assert_eq!(snap.connection_count, 1);
        assert_eq!(snap.reconnect_count, 1);
        assert_eq!(snap.current_attempt, 3);
    }

    #[test]
    fn conn_state_starts_disconnected_and_round_trips() {
        let stats = SourceStats::default();
        assert_eq!(stats.state(), ConnState::Disconnected);

        stats.set_state(ConnState::Connecting);
        assert_eq!(stats.state(), ConnState::Connecting);

        stats.set_state(ConnState::Connected);
        assert_eq!(stats.snapshot().state, ConnState::Connected);

        stats.set_state(ConnState::Closing);
        assert_eq!(stats.state(), ConnState::Closing);
    }
}
