//! Persistence boundary for the Watchlist Registry (spec §4.4, §6).
//!
//! `original_source/server/src/modules/database/database_manager.py` backs
//! this with aiosqlite; SPEC_FULL §1 keeps relational persistence out of
//! scope for this crate but still names the boundary as a trait so a real
//! store can be plugged in without touching the registry or dispatcher. The
//! in-memory implementation here exists for tests and for running the
//! pipeline without a database configured.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

/// A single watchlist (spec §3: Watchlist Entry's `list_id`/`list_name`/
/// `color` grouping).
#[derive(Debug, Clone)]
pub struct ListRecord {
    pub list_id: String,
    pub list_name: Option<String>,
    pub color: Option<String>,
}

/// One vessel entry within a list (spec §3 Watchlist Entry).
#[derive(Debug, Clone)]
pub struct VesselRecord {
    pub list_id: String,
    pub mmsi: Option<String>,
    pub imo: Option<String>,
}

/// A recorded watchlist match, matching the `detections(mmsi pk, imo,
/// latitude, longitude, last_detected_at, raw_data)` schema (spec §6).
#[derive(Debug, Clone)]
pub struct DetectionRecord {
    pub mmsi: String,
    pub imo: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub last_detected_at: String,
    pub raw_data: Option<String>,
}

#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn upsert_lists(&self, lists: &[ListRecord]) -> anyhow::Result<()>;
    async fn upsert_vessels(&self, vessels: &[VesselRecord]) -> anyhow::Result<()>;
    async fn load_all_lists(&self) -> anyhow::Result<Vec<ListRecord>>;
    async fn load_all_vessels(&self) -> anyhow::Result<Vec<VesselRecord>>;
    /// Records a push-back update so it survives process restarts even if
    /// the upstream provider call itself is best-effort (spec §4.4).
    async fn upsert_detection(&self, detection: DetectionRecord) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct InMemoryWatchlistStore {
    lists: RwLock<HashMap<String, ListRecord>>,
    vessels: RwLock<Vec<VesselRecord>>,
    detections: RwLock<HashMap<String, DetectionRecord>>,
}

impl InMemoryWatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatchlistStore for InMemoryWatchlistStore {
    async fn upsert_lists(&self, lists: &[ListRecord]) -> anyhow::Result<()> {
        let mut guard = self.lists.write().unwrap();
        for list in lists {
            guard.insert(list.list_id.clone(), list.clone());
        }
        Ok(())
    }

    async fn upsert_vessels(&self, vessels: &[VesselRecord]) -> anyhow::Result<()> {
        let mut guard = self.vessels.write().unwrap();
        guard.retain(|existing| {
            !vessels
                .iter()
                .any(|v| v.list_id == existing.list_id && v.mmsi == existing.mmsi && v.imo == existing.imo)
        });
        guard.extend(vessels.iter().cloned());
        Ok(())
    }

    async fn load_all_lists(&self) -> anyhow::Result<Vec<ListRecord>> {
        Ok(self.lists.read().unwrap().values().cloned().collect())
    }

    async fn load_all_vessels(&self) -> anyhow::Result<Vec<VesselRecord>> {
        Ok(self.vessels.read().unwrap().clone())
    }

    async fn upsert_detection(&self, detection: DetectionRecord) -> anyhow::Result<()> {
        self.detections
            .write()
            .unwrap()
            .insert(detection.imo.clone(), detection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_vessels_replaces_prior_entries_for_same_key() {
        let store = InMemoryWatchlistStore::new();
        store
            .upsert_vessels(&[VesselRecord {
                list_id: "l1".into(),
                mmsi: Some("111".into()),
                imo: None,
            }])
            .await
            .unwrap();
        store
            .upsert_vessels(&[VesselRecord {
                list_id: "l1".into(),
                mmsi: Some("111".into()),
                imo: Some("9000001".into()),
            }])
            .await
            .unwrap();

        let vessels = store.load_all_vessels().await.unwrap();
        assert_eq!(vessels.len(), 1);
        assert_eq!(vessels[0].imo.as_deref(), Some("9000001"));
    }

    #[tokio::test]
    async fn upsert_detection_is_queryable_through_reload() {
        let store = InMemoryWatchlistStore::new();
        store
            .upsert_detection(DetectionRecord {
                mmsi: "111".into(),
                imo: "9000001".into(),
                lat: Some(10.5),
                lon: Some(-20.25),
                last_detected_at: "2026-07-31T00:00:00+00:00".into(),
                raw_data: Some(r#"{"mmsi":"111"}"#.into()),
            })
            .await
            .unwrap();

        let recorded = store.detections.read().unwrap().get("9000001").cloned().unwrap();
        assert_eq!(recorded.mmsi, "111");
        assert_eq!(recorded.lat, Some(10.5));
        assert_eq!(recorded.lon, Some(-20.25));
    }
}
