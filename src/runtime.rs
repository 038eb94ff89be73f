//! Top-level `Runtime`: owns every collaborator and wires them together
//! with no hidden globals (design note §9 "process-wide state should be
//! owned by a Runtime struct, not scattered statics").
//!
//! The teacher's `AppState { ships: Arc<RwLock<ShipCache>> }` is the
//! single-field ancestor of this struct; `Runtime` generalizes it to the
//! full component graph SPEC_FULL §2 describes.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::Config;
use crate::dedup::DedupStore;
use crate::dispatcher::Dispatcher;
use crate::fanout::{AdmissionControl, FanoutServer};
use crate::source::adapter::SourceStats;
use crate::source::{SourceConfig, SourceKind};
use crate::vessel_state::VesselStore;
use crate::watchlist::client::{AuthConfig, WatchlistClient, WatchlistClientConfig};
use crate::watchlist::store::InMemoryWatchlistStore;
use crate::watchlist::{WatchlistRegistry, WatchlistStore};

const INGEST_CHANNEL_CAPACITY: usize = 4096;

pub struct Runtime {
    pub dispatcher: Arc<Dispatcher>,
    pub fanout: Arc<FanoutServer>,
    pub watchlist: Arc<WatchlistRegistry>,
    pub vessels: Arc<VesselStore>,
    sources: Vec<SourceConfig>,
    source_stats: RwLock<HashMap<String, Arc<SourceStats>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    pub fn new(config: &Config) -> Self {
        let dedup = Arc::new(DedupStore::new(config.dedup.window_secs, config.dedup.ttl_multiplier));
        let vessels = Arc::new(VesselStore::new(config.vessel.expire_after_secs));

        let store: Arc<dyn WatchlistStore> = Arc::new(InMemoryWatchlistStore::new());
        let client = build_watchlist_client(config);
        let watchlist = Arc::new(WatchlistRegistry::new(store, client));

        let admission = AdmissionControl::new(
            config.fanout.max_connections_per_ip,
            Duration::from_secs(config.fanout.rate_limit_window_secs),
            config.fanout.rate_limit_max_events,
            config.fanout.pool_capacity,
        );
        let fanout = Arc::new(FanoutServer::new(admission));

        let dispatcher = Arc::new(Dispatcher::new(
            dedup,
            vessels.clone(),
            watchlist.clone(),
            fanout.clone(),
            true,
            true,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            dispatcher,
            fanout,
            watchlist,
            vessels,
            sources: config.sources.clone(),
            source_stats: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn source_stats(&self, source_name: &str) -> Option<crate::source::SourceStatsSnapshot> {
        self.source_stats
            .read()
            .unwrap()
            .get(source_name)
            .map(|stats| stats.snapshot())
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Spawns one task per configured source adapter, the dispatcher's
    /// input loop, the periodic vessel-state cleanup task, and — if a
    /// watchlist provider is configured — the periodic sync task (spec §5:
    /// one task per source, a bounded channel feeding the dispatcher).
    pub fn spawn_all(self: &Arc<Self>, config: &Config) {
        let (tx, rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);

        for source_config in &self.sources {
            let source_config = source_config.clone();
            let stats = crate::source::adapter::new_stats();
            self.source_stats
                .write()
                .unwrap()
                .insert(source_config.name.clone(), stats.clone());
            let tx = tx.clone();
            let shutdown = self.shutdown_signal();
            tokio::spawn(async move {
                match source_config.kind {
                    SourceKind::TcpNmea => {
                        crate::source::tcp::run(source_config, stats, tx, shutdown).await;
                    }
                    SourceKind::WebSocketJson => {
                        crate::source::ws::run(source_config, stats, tx, shutdown).await;
                    }
                }
            });
        }
        drop(tx);

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.run(rx).await;
        });

        let cleanup_dispatcher = self.dispatcher.clone();
        let cleanup_interval = Duration::from_secs(config.vessel.cleanup_interval_secs);
        let cleanup_shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            cleanup_dispatcher.run_cleanup_task(cleanup_interval, cleanup_shutdown).await;
        });

        if config.watchlist.enabled {
            let watchlist = self.watchlist.clone();
            let sync_interval = Duration::from_secs(config.watchlist.sync_interval_secs);
            let mut sync_shutdown = self.shutdown_signal();
            tokio::spawn(async move {
                if let Err(e) = watchlist.load_from_store().await {
                    tracing::warn!(error = %e, "failed to load persisted watchlist on startup");
                }
                let mut ticker = tokio::time::interval(sync_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = watchlist.sync_from_provider().await {
                                tracing::warn!(error = %e, "watchlist sync failed");
                            }
                        }
                        _ = sync_shutdown.changed() => return,
                    }
                }
            });
        }

        info!(sources = self.sources.len(), "runtime spawned all background tasks");
    }

    pub fn client_ip_from_socket(addr: std::net::SocketAddr) -> IpAddr {
        addr.ip()
    }
}

fn build_watchlist_client(config: &Config) -> Option<Arc<WatchlistClient>> {
    if !config.watchlist.enabled {
        return None;
    }
    let base_url = config.watchlist.base_url.clone()?;
    let secret = config.watchlist_auth_secret();
    let auth = match config.watchlist.auth_type {
        crate::config::WatchlistAuthType::None => AuthConfig::None,
        crate::config::WatchlistAuthType::Bearer => AuthConfig::Bearer(secret.unwrap_or_default()),
        crate::config::WatchlistAuthType::ApiKey => AuthConfig::ApiKey(secret.unwrap_or_default()),
        crate::config::WatchlistAuthType::Basic => {
            let mut parts = secret.unwrap_or_default().splitn(2, ':').map(str::to_string);
            AuthConfig::Basic {
                username: parts.next().unwrap_or_default(),
                password: parts.next().unwrap_or_default(),
            }
        }
    };

    let client_config = WatchlistClientConfig {
        base_url,
        auth,
        timeout: config.watchlist.request_timeout(),
    };
    WatchlistClient::new(client_config).ok().map(Arc::new)
}
