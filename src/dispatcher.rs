//! Dispatcher: the per-message processing pipeline (spec §4.3).
//!
//! Grounded on `original_source/collettore/src/aggregation/message_processor.py::process_message`'s
//! six-step order: broadcast raw unconditionally, dedup check (short-circuit
//! on duplicate), vessel-state update, watchlist lookup with push-back
//! scheduling, enrichment, broadcast filtered. `cleanup_task` there maps to
//! [`Dispatcher::run_cleanup_task`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::dedup::DedupStore;
use crate::fanout::FanoutServer;
use crate::model::{MatchedBy, NormalizedMessage, OutboundTrackEvent};
use crate::vessel_state::VesselStore;
use crate::watchlist::store::DetectionRecord;
use crate::watchlist::WatchlistRegistry;

#[derive(Default)]
pub struct DispatcherStats {
    pub total_received: AtomicU64,
    pub total_duplicate: AtomicU64,
    pub total_unique: AtomicU64,
    pub total_watchlist_matches: AtomicU64,
}

pub struct Dispatcher {
    dedup: Arc<DedupStore>,
    vessels: Arc<VesselStore>,
    watchlist: Arc<WatchlistRegistry>,
    fanout: Arc<FanoutServer>,
    stats: Arc<DispatcherStats>,
    dedup_enabled: bool,
    state_tracking_enabled: bool,
}

impl Dispatcher {
    pub fn new(
        dedup: Arc<DedupStore>,
        vessels: Arc<VesselStore>,
        watchlist: Arc<WatchlistRegistry>,
        fanout: Arc<FanoutServer>,
        dedup_enabled: bool,
        state_tracking_enabled: bool,
    ) -> Self {
        Self {
            dedup,
            vessels,
            watchlist,
            fanout,
            stats: Arc::new(DispatcherStats::default()),
            dedup_enabled,
            state_tracking_enabled,
        }
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Runs the six-step pipeline for one message (spec §4.3).
    pub fn process_message(&self, mut message: NormalizedMessage, source_name: &str) {
        self.stats.total_received.fetch_add(1, Ordering::Relaxed);
        if message.source.is_none() {
            message.source = Some(source_name.to_string());
        }
        message.drop_sentinels();

        // Step 1: raw fanout, unconditional.
        self.fanout.broadcast_raw(&message);

        // Step 2: dedup check, short-circuit on duplicate.
        if self.dedup_enabled && self.dedup.check_and_insert(&message) {
            self.stats.total_duplicate.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.total_unique.fetch_add(1, Ordering::Relaxed);

        // Step 3: vessel-state update.
        if self.state_tracking_enabled {
            self.vessels.update(&message, Some(source_name));
        }

        // Step 4: watchlist lookup, with IMO-match push-back scheduling.
        let watchlist_match = self.watchlist.check_message(&message);
        if let Some(matched) = &watchlist_match {
            self.stats.total_watchlist_matches.fetch_add(1, Ordering::Relaxed);
            if matched.matched_by == MatchedBy::Imo {
                if let (Some(imo), Some(mmsi)) = (&message.imo, &matched.mmsi) {
                    self.watchlist.schedule_push_back(DetectionRecord {
                        mmsi: mmsi.clone(),
                        imo: imo.clone(),
                        lat: message.lat,
                        lon: message.lon,
                        last_detected_at: chrono::Utc::now().to_rfc3339(),
                        raw_data: serde_json::to_string(&message).ok(),
                    });
                }
            }
        }

        // Steps 5-6: build the outbound event and fan it out.
        let event = OutboundTrackEvent::from_message(&message, watchlist_match.clone()).with_list_id();
        self.fanout.broadcast_track_update(&event, watchlist_match.as_ref());
    }

    /// Periodic vessel-state sweep (spec §4.3, §5). Runs until `shutdown`
    /// fires.
    pub async fn run_cleanup_task(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.vessels.cleanup_expired();
                    if removed > 0 {
                        debug!(removed, "vessel-state cleanup swept expired records");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Drains the inbound channel fed by all source adapters, processing
    /// each message in order of arrival.
    pub async fn run(&self, mut rx: mpsc::Receiver<(NormalizedMessage, String)>) {
        while let Some((message, source_name)) = rx.recv().await {
            self.process_message(message, &source_name);
        }
        info!("dispatcher input channel closed, exiting");
    }
}
