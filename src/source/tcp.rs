//! TCP/NMEA Source Adapter (spec §4.1, §6): connects to a plain TCP stream
//! of CR/LF-terminated ASCII AIS sentences and hands each line to the NMEA
//! Assembler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::nmea::NmeaAssembler;
use crate::source::adapter::{backoff_delay, wait_with_cancellation, ConnState, SourceConfig, SourceStats};

const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(
    config: SourceConfig,
    stats: Arc<SourceStats>,
    tx: mpsc::Sender<(crate::model::NormalizedMessage, String)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut assembler = NmeaAssembler::new(60);

    loop {
        if *shutdown.borrow() {
            stats.set_state(ConnState::Closing);
            stats.set_state(ConnState::Disconnected);
            return;
        }

        stats.set_attempt(attempt);
        stats.set_state(ConnState::Connecting);
        match TcpStream::connect(&config.endpoint).await {
            Ok(stream) => {
                info!(source = %config.name, endpoint = %config.endpoint, "connected to TCP/NMEA source");
                stats.set_connected(true);
                stats.set_state(ConnState::Connected);
                stats.record_connection();
                attempt = 0;

                read_loop(&config, &stats, &mut assembler, stream, &tx, &mut shutdown).await;

                stats.set_connected(false);
                if *shutdown.borrow() {
                    stats.set_state(ConnState::Closing);
                    stats.set_state(ConnState::Disconnected);
                    return;
                }
                stats.set_state(ConnState::Disconnected);
            }
            Err(e) => {
                error!(source = %config.name, error = %e, "TCP connect failed");
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

async fn read_loop(
    config: &SourceConfig,
    stats: &Arc<SourceStats>,
    assembler: &mut NmeaAssembler,
    stream: TcpStream,
    tx: &mpsc::Sender<(crate::model::NormalizedMessage, String)>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            result = tokio::time::timeout(READ_IDLE_TIMEOUT, reader.read_line(&mut line)) => result,
            _ = shutdown.changed() => {
                return;
            }
        };

        match read {
            Ok(Ok(0)) => {
                debug!(source = %config.name, "connection closed by remote");
                return;
            }
            Ok(Ok(n)) => {
                stats.record_message(n);
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(message) = assembler.parse(trimmed) {
                    if tx.send((message, config.name.clone())).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(source = %config.name, error = %e, "read error");
                return;
            }
            Err(_) => {
                debug!(source = %config.name, "read idle timeout, treating connection as dead");
                return;
            }
        }
    }
}
