//! Time-bucketed dedup key store (spec §3, §4.3).
//!
//! A message is a duplicate iff its key is already present. Keys live for
//! `W * M` seconds. The spec's source derives the key via MD5 of a composed
//! string; SPEC_FULL §9 allows any stable non-cryptographic 128-bit hash, so
//! this uses XXH3 (`twox-hash`), already aligned with the rest of the
//! dependency stack (no new hashing dependency beyond what's declared).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use twox_hash::xxh3::hash128;

use crate::model::NormalizedMessage;

pub type DedupKey = u128;

/// Compute the dedup key for a message: `(mmsi, timestamp bucketed to W
/// seconds, lat rounded to 4 decimals, lon rounded to 4 decimals)` (spec
/// §3). Static messages (no lat/lon) use `0.0` for both — intentional per
/// the spec's dedup edge cases, collapsing same-MMSI static reports within
/// the window (an open question per spec §9, implemented as specified).
pub fn dedup_key(message: &NormalizedMessage, window_secs: u64, now_secs: i64) -> DedupKey {
    let ts = message
        .timestamp
        .as_ref()
        .and_then(|t| t.as_epoch_secs())
        .unwrap_or(now_secs);

    let bucket = if window_secs == 0 {
        ts
    } else {
        (ts as i64).div_euclid(window_secs as i64) * window_secs as i64
    };

    let mmsi = message.mmsi.as_deref().unwrap_or("");
    let lat = message.lat.unwrap_or(0.0);
    let lon = message.lon.unwrap_or(0.0);

    let composed = format!("{mmsi}-{bucket}-{lat:.4}-{lon:.4}");
    hash128(composed.as_bytes())
}

struct Entry {
    expires_at: i64,
}

/// Dedup store: insert-if-absent with TTL, swept lazily on access.
pub struct DedupStore {
    entries: Mutex<HashMap<DedupKey, Entry>>,
    window_secs: u64,
    ttl_multiplier: u64,
}

impl DedupStore {
    pub fn new(window_secs: u64, ttl_multiplier: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window_secs,
            ttl_multiplier,
        }
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    /// Returns `true` if the message is a duplicate; otherwise inserts its
    /// key with TTL `W * M` and returns `false`.
    pub fn check_and_insert(&self, message: &NormalizedMessage) -> bool {
        let now = Self::now_secs();
        let key = dedup_key(message, self.window_secs, now);
        let ttl = (self.window_secs * self.ttl_multiplier) as i64;

        let mut entries = self.entries.lock().unwrap();
        self.sweep_locked(&mut entries, now);

        if let Some(entry) = entries.get(&key) {
            if entry.expires_at > now {
                return true;
            }
        }

        entries.insert(
            key,
            Entry {
                expires_at: now + ttl,
            },
        );
        false
    }

    fn sweep_locked(&self, entries: &mut HashMap<DedupKey, Entry>, now: i64) {
        entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(mmsi: &str, ts: i64, lat: f64, lon: f64) -> NormalizedMessage {
        NormalizedMessage {
            mmsi: Some(mmsi.to_string()),
            timestamp: Some(crate::model::TimestampValue::Epoch(ts)),
            lat: Some(lat),
            lon: Some(lon),
            ..Default::default()
        }
    }

    // Bucketing is `ts.div_euclid(window) * window` (floor), matching
    // `redis_cache.py::is_duplicate`'s `int(ts // 30) * 30`. A pair like
    // 1000/1020 sits on opposite sides of the 1020 bucket edge even though
    // they're 20s apart, so "any two messages within the window" isn't
    // guaranteed to land in the same bucket — only pairs that don't
    // straddle a bucket edge do. Use such a pair here.
    #[test]
    fn s1_dedup_within_window() {
        let store = DedupStore::new(30, 2);
        let m1 = msg("111", 1000, 10.0, 20.0);
        let m2 = msg("111", 1010, 10.00001, 20.00001);

        assert!(!store.check_and_insert(&m1));
        assert!(store.check_and_insert(&m2));
    }

    #[test]
    fn distinct_positions_are_not_duplicates() {
        let store = DedupStore::new(30, 2);
        let m1 = msg("111", 1000, 10.0, 20.0);
        let m2 = msg("111", 1000, 11.0, 20.0);

        assert!(!store.check_and_insert(&m1));
        assert!(!store.check_and_insert(&m2));
    }

    #[test]
    fn static_messages_without_position_collapse_within_window() {
        let store = DedupStore::new(30, 2);
        let m1 = NormalizedMessage {
            mmsi: Some("222".into()),
            timestamp: Some(crate::model::TimestampValue::Epoch(1000)),
            name: Some("ALPHA".into()),
            ..Default::default()
        };
        let m2 = NormalizedMessage {
            mmsi: Some("222".into()),
            timestamp: Some(crate::model::TimestampValue::Epoch(1010)),
            name: Some("ALPHA2".into()),
            ..Default::default()
        };

        assert!(!store.check_and_insert(&m1));
        assert!(store.check_and_insert(&m2));
    }

    #[test]
    fn different_bucket_is_not_a_duplicate() {
        let store = DedupStore::new(30, 2);
        let m1 = msg("111", 1000, 10.0, 20.0);
        let m2 = msg("111", 1031, 10.0, 20.0);

        assert!(!store.check_and_insert(&m1));
        assert!(!store.check_and_insert(&m2));
    }

    #[test]
    fn key_is_deterministic() {
        let m1 = msg("333", 1000, 5.1234, -3.4321);
        let m2 = msg("333", 1000, 5.1234, -3.4321);
        assert_eq!(
            dedup_key(&m1, 30, 0),
            dedup_key(&m2, 30, 0)
        );
    }
}
