//! Per-vessel state store: last-observed attributes, TTL eviction, and the
//! `active_vessels` auxiliary set (spec §3, §4.3).
//!
//! Grounded on `original_source/collettore/src/storage/redis_cache.py`'s
//! `update_vessel`/`get_vessel`/`cleanup_expired_vessels`, translated from a
//! Redis hash-per-vessel + TTL into a typed in-memory record guarded by a
//! single `RwLock` (the dispatcher is the sole writer; reads come from
//! control-plane queries that tolerate staleness, per spec §5).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::NormalizedMessage;

/// Known fields plus an `extras` map for forward compatibility (SPEC_FULL
/// §3 supplement, resolving design note §9's "dynamic attribute merging").
#[derive(Debug, Clone, Default)]
pub struct VesselRecord {
    pub mmsi: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub heading: Option<u32>,
    pub name: Option<String>,
    pub imo: Option<String>,
    pub callsign: Option<String>,
    pub shiptype: Option<u32>,
    /// Raw `timestamp` value from the message that last updated the
    /// record, stored verbatim (string or numeric) per SPEC_FULL §3 —
    /// deliberately not normalized, matching the source's behavior.
    pub last_update: Option<String>,
    pub message_count: u64,
    pub sources: HashSet<String>,
    pub extras: HashMap<String, String>,
    expires_at: i64,
}

impl VesselRecord {
    /// Merge a message into this record per spec §3 invariants: once a
    /// non-empty static attribute has been observed it's retained even if a
    /// later message omits it; position fields are overwritten whenever
    /// present.
    fn merge(&mut self, message: &NormalizedMessage, source: Option<&str>, expire_after: i64) {
        if message.lat.is_some() {
            self.lat = message.lat;
        }
        if message.lon.is_some() {
            self.lon = message.lon;
        }
        if message.speed.is_some() {
            self.speed = message.speed;
        }
        if message.course.is_some() {
            self.course = message.course;
        }
        if message.heading.is_some() {
            self.heading = message.heading;
        }

        if let Some(name) = &message.name {
            if !name.is_empty() {
                self.name = Some(name.clone());
            }
        }
        if let Some(imo) = &message.imo {
            if !imo.is_empty() {
                self.imo = Some(imo.clone());
            }
        }
        if let Some(callsign) = &message.callsign {
            if !callsign.is_empty() {
                self.callsign = Some(callsign.clone());
            }
        }
        if message.shiptype.is_some() {
            self.shiptype = message.shiptype;
        }

        self.last_update = message.timestamp.as_ref().map(|t| match t {
            crate::model::TimestampValue::Epoch(v) => v.to_string(),
            crate::model::TimestampValue::Iso(s) => s.clone(),
        });

        self.message_count += 1;

        if let Some(source) = source {
            self.sources.insert(source.to_string());
        }

        let now = Self::now_secs();
        self.expires_at = now + expire_after;
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

pub struct VesselStore {
    records: RwLock<HashMap<String, VesselRecord>>,
    active: RwLock<HashSet<String>>,
    expire_after_secs: i64,
}

impl VesselStore {
    pub fn new(expire_after_secs: i64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            active: RwLock::new(HashSet::new()),
            expire_after_secs,
        }
    }

    /// Update (creating if absent) the record for the message's MMSI. A
    /// no-op if the message has no MMSI.
    pub fn update(&self, message: &NormalizedMessage, source: Option<&str>) {
        let Some(mmsi) = message.mmsi.clone() else {
            return;
        };

        let mut records = self.records.write().unwrap();
        let record = records.entry(mmsi.clone()).or_insert_with(|| VesselRecord {
            mmsi: mmsi.clone(),
            ..Default::default()
        });
        record.merge(message, source, self.expire_after_secs);

        self.active.write().unwrap().insert(mmsi);
    }

    pub fn get(&self, mmsi: &str) -> Option<VesselRecord> {
        self.records.read().unwrap().get(mmsi).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().unwrap().len()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Sweep expired records from both the record map and the active set
    /// (spec §4.3 periodic cleanup, invariant #4). Returns the number of
    /// MMSIs removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = VesselRecord::now_secs();
        let mut records = self.records.write().unwrap();
        let mut active = self.active.write().unwrap();

        let expired: Vec<String> = records
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(mmsi, _)| mmsi.clone())
            .collect();

        for mmsi in &expired {
            records.remove(mmsi);
            active.remove(mmsi);
        }

        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimestampValue;

    fn position_msg(mmsi: &str, lat: f64, lon: f64) -> NormalizedMessage {
        NormalizedMessage {
            mmsi: Some(mmsi.to_string()),
            lat: Some(lat),
            lon: Some(lon),
            timestamp: Some(TimestampValue::Epoch(1000)),
            ..Default::default()
        }
    }

    #[test]
    fn s2_vessel_attribute_persistence() {
        let store = VesselStore::new(3600);
        let static_msg = NormalizedMessage {
            mmsi: Some("222".into()),
            name: Some("ALPHA".into()),
            imo: Some("9000001".into()),
            ..Default::default()
        };
        store.update(&static_msg, Some("src-a"));

        let pos_msg = position_msg("222", 45.0, -5.0);
        store.update(&pos_msg, Some("src-a"));

        let record = store.get("222").unwrap();
        assert_eq!(record.name.as_deref(), Some("ALPHA"));
        assert_eq!(record.imo.as_deref(), Some("9000001"));
        assert_eq!(record.lat, Some(45.0));
        assert_eq!(record.lon, Some(-5.0));
        assert_eq!(record.message_count, 2);
    }

    #[test]
    fn position_fields_overwritten_each_update() {
        let store = VesselStore::new(3600);
        store.update(&position_msg("333", 1.0, 2.0), None);
        store.update(&position_msg("333", 3.0, 4.0), None);

        let record = store.get("333").unwrap();
        assert_eq!(record.lat, Some(3.0));
        assert_eq!(record.lon, Some(4.0));
    }

    #[test]
    fn no_mmsi_is_a_noop() {
        let store = VesselStore::new(3600);
        let msg = NormalizedMessage {
            name: Some("NOID".into()),
            ..Default::default()
        };
        store.update(&msg, None);
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn invariant_4_ttl_eviction_removes_from_both_sets() {
        let store = VesselStore::new(-1); // already expired on insert
        store.update(&position_msg("444", 1.0, 1.0), None);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.active_count(), 1);

        let removed = store.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.active_count(), 0);
        assert!(store.get("444").is_none());
    }

    #[test]
    fn sources_accumulate() {
        let store = VesselStore::new(3600);
        store.update(&position_msg("555", 1.0, 1.0), Some("feed-a"));
        store.update(&position_msg("555", 1.0, 1.0), Some("feed-b"));

        let record = store.get("555").unwrap();
        assert_eq!(record.sources.len(), 2);
        assert!(record.sources.contains("feed-a"));
        assert!(record.sources.contains("feed-b"));
    }
}
