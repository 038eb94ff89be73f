//! Watchlist Registry: in-memory lookup index, atomically swapped on sync
//! (spec §4.4, design note §9).
//!
//! Grounded on
//! `original_source/server/src/modules/watchlist/watchlist_manager.py`'s
//! `mmsi_cache`/`imo_cache`/`lists_cache` dicts and `check_message` (MMSI
//! first, IMO fallback, push-back scheduling on IMO match). The Python side
//! mutates its dicts in place under its own lock; SPEC_FULL §9 resolves the
//! "atomic index swap" open question with `RwLock<Arc<WatchlistIndex>>` —
//! readers take a cheap snapshot of the `Arc`, a sync rebuilds a fresh index
//! off to the side and swaps it in with one write-lock acquisition.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::model::{MatchedBy, NormalizedMessage, WatchlistMatch};

use super::client::WatchlistClient;
use super::store::{DetectionRecord, ListRecord, VesselRecord, WatchlistStore};

struct IndexEntry {
    list_id: String,
    list_name: Option<String>,
    color: Option<String>,
}

#[derive(Default)]
struct WatchlistIndex {
    by_mmsi: HashMap<String, IndexEntry>,
    by_imo: HashMap<String, IndexEntry>,
}

impl WatchlistIndex {
    fn build(lists: &[ListRecord], vessels: &[VesselRecord]) -> Self {
        let list_meta: HashMap<&str, &ListRecord> =
            lists.iter().map(|l| (l.list_id.as_str(), l)).collect();

        let mut index = WatchlistIndex::default();
        for vessel in vessels {
            let meta = list_meta.get(vessel.list_id.as_str());
            let entry = || IndexEntry {
                list_id: vessel.list_id.clone(),
                list_name: meta.and_then(|m| m.list_name.clone()),
                color: meta.and_then(|m| m.color.clone()),
            };
            if let Some(mmsi) = &vessel.mmsi {
                index.by_mmsi.insert(mmsi.clone(), entry());
            }
            if let Some(imo) = &vessel.imo {
                index.by_imo.insert(imo.clone(), entry());
            }
        }
        index
    }
}

pub struct WatchlistRegistry {
    index: RwLock<Arc<WatchlistIndex>>,
    store: Arc<dyn WatchlistStore>,
    client: Option<Arc<WatchlistClient>>,
}

impl WatchlistRegistry {
    pub fn new(store: Arc<dyn WatchlistStore>, client: Option<Arc<WatchlistClient>>) -> Self {
        Self {
            index: RwLock::new(Arc::new(WatchlistIndex::default())),
            store,
            client,
        }
    }

    /// Loads the persisted snapshot into the index. Call once at startup
    /// before the first `sync_from_provider`, so lookups work even if the
    /// provider is briefly unreachable (spec §4.4 persistence boundary).
    pub async fn load_from_store(&self) -> anyhow::Result<()> {
        let lists = self.store.load_all_lists().await?;
        let vessels = self.store.load_all_vessels().await?;
        self.swap_index(&lists, &vessels);
        Ok(())
    }

    /// Fetches the full watchlist from the upstream provider, persists it,
    /// then atomically replaces the lookup index (spec §4.4
    /// `sync_from_api`).
    pub async fn sync_from_provider(&self) -> anyhow::Result<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let (lists, vessels) = client.fetch_all().await?;
        self.store.upsert_lists(&lists).await?;
        self.store.upsert_vessels(&vessels).await?;
        info!(lists = lists.len(), vessels = vessels.len(), "watchlist synced from provider");
        self.swap_index(&lists, &vessels);
        Ok(())
    }

    fn swap_index(&self, lists: &[ListRecord], vessels: &[VesselRecord]) {
        let fresh = Arc::new(WatchlistIndex::build(lists, vessels));
        *self.index.write().unwrap() = fresh;
    }

    fn snapshot(&self) -> Arc<WatchlistIndex> {
        self.index.read().unwrap().clone()
    }

    /// MMSI-first, IMO-fallback lookup (spec §4.4 `check_message`). When the
    /// match came from IMO and the message also carries an MMSI, the match
    /// carries that MMSI forward (spec §3 Watchlist Entry / §4.4), and the
    /// caller is expected to schedule a push-back via
    /// [`WatchlistRegistry::schedule_push_back`].
    pub fn check_message(&self, message: &NormalizedMessage) -> Option<WatchlistMatch> {
        let index = self.snapshot();

        if let Some(mmsi) = &message.mmsi {
            if let Some(entry) = index.by_mmsi.get(mmsi) {
                return Some(WatchlistMatch {
                    list_id: entry.list_id.clone(),
                    list_name: entry.list_name.clone(),
                    color: entry.color.clone(),
                    matched_by: MatchedBy::Mmsi,
                    mmsi: Some(mmsi.clone()),
                });
            }
        }

        if let Some(imo) = &message.imo {
            if let Some(entry) = index.by_imo.get(imo) {
                return Some(WatchlistMatch {
                    list_id: entry.list_id.clone(),
                    list_name: entry.list_name.clone(),
                    color: entry.color.clone(),
                    matched_by: MatchedBy::Imo,
                    mmsi: message.mmsi.clone(),
                });
            }
        }

        None
    }

    /// Fires a best-effort push-back to the provider recording that this
    /// IMO was observed under this MMSI, without blocking the caller (spec
    /// §4.4 `_schedule_vessel_update`), and persists the detection itself
    /// (`detections(mmsi, imo, latitude, longitude, last_detected_at,
    /// raw_data)`, spec §6). The provider push-back still fires even
    /// without a configured store detection write, and vice versa; each
    /// failure is logged and swallowed independently.
    pub fn schedule_push_back(self: &Arc<Self>, detection: DetectionRecord) {
        let store = self.store.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Some(client) = client {
                client.update_vessel_by_imo(&detection.imo, &detection.mmsi).await;
            }
            let (imo, mmsi) = (detection.imo.clone(), detection.mmsi.clone());
            if let Err(e) = store.upsert_detection(detection).await {
                warn!(imo, mmsi, error = %e, "failed to persist watchlist detection");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchlist::store::InMemoryWatchlistStore;

    fn message(mmsi: Option<&str>, imo: Option<&str>) -> NormalizedMessage {
        NormalizedMessage {
            mmsi: mmsi.map(str::to_string),
            imo: imo.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn s5_imo_fallback_surfaces_message_mmsi() {
        let store: Arc<dyn WatchlistStore> = Arc::new(InMemoryWatchlistStore::new());
        store
            .upsert_lists(&[ListRecord {
                list_id: "l1".into(),
                list_name: Some("Sanctioned".into()),
                color: Some("#ff0000".into()),
            }])
            .await
            .unwrap();
        store
            .upsert_vessels(&[VesselRecord {
                list_id: "l1".into(),
                mmsi: None,
                imo: Some("9000001".into()),
            }])
            .await
            .unwrap();

        let registry = WatchlistRegistry::new(store, None);
        registry.load_from_store().await.unwrap();

        let matched = registry
            .check_message(&message(Some("999"), Some("9000001")))
            .expect("imo match");
        assert_eq!(matched.matched_by, MatchedBy::Imo);
        assert_eq!(matched.mmsi.as_deref(), Some("999"));
        assert_eq!(matched.list_name.as_deref(), Some("Sanctioned"));
    }

    #[tokio::test]
    async fn mmsi_match_takes_priority_over_imo() {
        let store: Arc<dyn WatchlistStore> = Arc::new(InMemoryWatchlistStore::new());
        store
            .upsert_lists(&[ListRecord {
                list_id: "l1".into(),
                list_name: None,
                color: None,
            }])
            .await
            .unwrap();
        store
            .upsert_vessels(&[VesselRecord {
                list_id: "l1".into(),
                mmsi: Some("111".into()),
                imo: None,
            }])
            .await
            .unwrap();

        let registry = WatchlistRegistry::new(store, None);
        registry.load_from_store().await.unwrap();

        let matched = registry
            .check_message(&message(Some("111"), Some("nonexistent")))
            .unwrap();
        assert_eq!(matched.matched_by, MatchedBy::Mmsi);
    }

    #[tokio::test]
    async fn no_match_returns_none() {
        let store: Arc<dyn WatchlistStore> = Arc::new(InMemoryWatchlistStore::new());
        let registry = WatchlistRegistry::new(store, None);
        registry.load_from_store().await.unwrap();
        assert!(registry.check_message(&message(Some("111"), None)).is_none());
    }
}
