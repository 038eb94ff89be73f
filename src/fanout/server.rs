//! Fan-out server: named subscription pools and lossy broadcast (spec
//! §4.5, design note §9).
//!
//! Grounded on
//! `original_source/server/src/modules/websocket/websocket_server.py`'s
//! `ConnectionManager.broadcast`/`_safe_send` (gather-with-exceptions,
//! disconnect on send failure) and `WebSocketServer.broadcast_track_update`
//! (fan to all/watchlist/geo/geo_watchlist pools by relevance).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::bbox::BoundingBox;
use crate::model::{NormalizedMessage, OutboundTrackEvent, WatchlistMatch};

use super::admission::{AdmissionControl, AdmissionError};
use super::subscriber::{PoolTag, Subscriber};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Server-wide counters (spec §4.5 Statistics): `messages_sent`,
/// `messages_failed`, `connections_rate_limited`, plus lifetime total
/// connections per pool.
#[derive(Default)]
pub struct FanoutStats {
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    connections_rate_limited: AtomicU64,
    pool_connections: RwLock<HashMap<PoolTag, u64>>,
}

pub struct FanoutStatsSnapshot {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub connections_rate_limited: u64,
}

impl FanoutStats {
    fn record_connection(&self, pool_tag: PoolTag) {
        *self.pool_connections.write().unwrap().entry(pool_tag).or_insert(0) += 1;
    }

    pub fn pool_connection_count(&self, pool_tag: PoolTag) -> u64 {
        self.pool_connections.read().unwrap().get(&pool_tag).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            connections_rate_limited: self.connections_rate_limited.load(Ordering::Relaxed),
        }
    }
}

pub struct FanoutServer {
    pools: RwLock<HashMap<PoolTag, Vec<Subscriber>>>,
    admission: AdmissionControl,
    stats: FanoutStats,
}

impl FanoutServer {
    pub fn new(admission: AdmissionControl) -> Self {
        let mut pools = HashMap::new();
        for tag in [
            PoolTag::Raw,
            PoolTag::All,
            PoolTag::Watchlist,
            PoolTag::Geo,
            PoolTag::GeoWatchlist,
        ] {
            pools.insert(tag, Vec::new());
        }
        Self {
            pools: RwLock::new(pools),
            admission,
            stats: FanoutStats::default(),
        }
    }

    pub fn stats(&self) -> &FanoutStats {
        &self.stats
    }

    /// Runs admission control and, on success, registers a new subscriber
    /// in its pool, returning the receiving half of its outbound channel.
    pub fn subscribe(
        &self,
        pool_tag: PoolTag,
        client_ip: IpAddr,
        filter: Option<BoundingBox>,
    ) -> Result<(Uuid, mpsc::Receiver<String>), AdmissionError> {
        let current_pool_size = self.pools.read().unwrap().get(&pool_tag).map(Vec::len).unwrap_or(0);
        if let Err(e) = self.admission.admit(client_ip, current_pool_size, filter.as_ref()) {
            if matches!(e, AdmissionError::RateLimited) {
                self.stats.connections_rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            return Err(e);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let subscriber = Subscriber::new(pool_tag, client_ip, filter, tx);
        let id = subscriber.id;

        self.pools.write().unwrap().entry(pool_tag).or_default().push(subscriber);
        self.admission.record_connect(client_ip);
        self.stats.record_connection(pool_tag);
        Ok((id, rx))
    }

    pub fn unsubscribe(&self, pool_tag: PoolTag, id: Uuid) {
        let mut pools = self.pools.write().unwrap();
        if let Some(pool) = pools.get_mut(&pool_tag) {
            if let Some(pos) = pool.iter().position(|s| s.id == id) {
                let subscriber = pool.remove(pos);
                self.admission.record_disconnect(subscriber.client_ip);
            }
        }
    }

    /// Every ingested message, unfiltered and untagged (spec §4.3 step 1,
    /// §4.5 `raw` pool).
    pub fn broadcast_raw(&self, message: &NormalizedMessage) {
        let Ok(payload) = serde_json::to_string(message) else {
            return;
        };
        self.broadcast_to_pool(PoolTag::Raw, &payload, None);
    }

    /// Post-dispatch event, fanned to `all` unconditionally, to `watchlist`
    /// when matched, and to the geo pools when the event carries a
    /// position inside a subscriber's box (spec §4.5
    /// `broadcast_track_update`).
    pub fn broadcast_track_update(&self, event: &OutboundTrackEvent, watchlist: Option<&WatchlistMatch>) {
        let Ok(all_payload) = serde_json::to_string(event) else {
            return;
        };
        self.broadcast_to_pool(PoolTag::All, &all_payload, None);

        if watchlist.is_some() {
            let mut watchlist_event = event.clone();
            watchlist_event.list_id = watchlist.map(|w| w.list_id.clone());
            if let Ok(payload) = serde_json::to_string(&watchlist_event) {
                self.broadcast_to_pool(PoolTag::Watchlist, &payload, None);
            }
        }

        if let (Some(lat), Some(lon)) = (event.lat, event.lon) {
            self.broadcast_to_pool(PoolTag::Geo, &all_payload, Some((lat, lon)));
            if watchlist.is_some() {
                let mut geo_watchlist_event = event.clone();
                geo_watchlist_event.list_id = watchlist.map(|w| w.list_id.clone());
                if let Ok(payload) = serde_json::to_string(&geo_watchlist_event) {
                    self.broadcast_to_pool(PoolTag::GeoWatchlist, &payload, Some((lat, lon)));
                }
            }
        }
    }

    fn broadcast_to_pool(&self, pool_tag: PoolTag, payload: &str, position: Option<(f64, f64)>) {
        let mut dead = Vec::new();
        {
            let pools = self.pools.read().unwrap();
            let Some(pool) = pools.get(&pool_tag) else {
                return;
            };
            for subscriber in pool {
                if let Some((lat, lon)) = position {
                    match &subscriber.filter {
                        Some(bbox) if bbox.contains(lat, lon) => {}
                        _ => continue,
                    }
                }
                if subscriber.try_send(payload) {
                    self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.messages_failed.fetch_add(1, Ordering::Relaxed);
                    dead.push(subscriber.id);
                }
            }
        }

        if !dead.is_empty() {
            debug!(pool = pool_tag.as_str(), count = dead.len(), "dropping unresponsive subscribers");
            let mut pools = self.pools.write().unwrap();
            if let Some(pool) = pools.get_mut(&pool_tag) {
                pool.retain(|s| {
                    if dead.contains(&s.id) {
                        self.admission.record_disconnect(s.client_ip);
                        false
                    } else {
                        true
                    }
                });
            }
        }
    }

    pub fn pool_size(&self, pool_tag: PoolTag) -> usize {
        self.pools.read().unwrap().get(&pool_tag).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn server() -> FanoutServer {
        FanoutServer::new(AdmissionControl::new(100, Duration::from_secs(60), 1000, 100))
    }

    #[test]
    fn broadcast_raw_reaches_raw_subscriber_only() {
        let server = server();
        let (_id, mut rx) = server.subscribe(PoolTag::Raw, localhost(), None).unwrap();
        let (_all_id, mut all_rx) = server.subscribe(PoolTag::All, localhost(), None).unwrap();

        let message = NormalizedMessage {
            mmsi: Some("111".into()),
            ..Default::default()
        };
        server.broadcast_raw(&message);

        assert!(rx.try_recv().is_ok());
        assert!(all_rx.try_recv().is_err());
    }

    #[test]
    fn s6_slow_subscriber_is_dropped_without_blocking_others() {
        let server = server();
        let (_slow_id, slow_rx) = server.subscribe(PoolTag::All, localhost(), None).unwrap();
        let (_fast_id, mut fast_rx) = server.subscribe(PoolTag::All, localhost(), None).unwrap();
        drop(slow_rx);

        let event = OutboundTrackEvent::from_message(
            &NormalizedMessage {
                mmsi: Some("111".into()),
                ..Default::default()
            },
            None,
        );
        server.broadcast_track_update(&event, None);

        assert!(fast_rx.try_recv().is_ok());
        assert_eq!(server.pool_size(PoolTag::All), 1);

        let stats = server.stats().snapshot();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_failed, 1);
    }

    #[test]
    fn rate_limited_connection_attempt_is_counted() {
        let server = FanoutServer::new(AdmissionControl::new(100, Duration::from_secs(60), 1, 100));
        assert!(server.subscribe(PoolTag::All, localhost(), None).is_ok());
        assert!(server.subscribe(PoolTag::All, localhost(), None).is_err());

        assert_eq!(server.stats().snapshot().connections_rate_limited, 1);
    }

    #[test]
    fn pool_connection_count_tracks_lifetime_admissions() {
        let server = server();
        let (_id, _rx) = server.subscribe(PoolTag::Raw, localhost(), None).unwrap();
        let (id2, _rx2) = server.subscribe(PoolTag::Raw, localhost(), None).unwrap();
        server.unsubscribe(PoolTag::Raw, id2);

        assert_eq!(server.stats().pool_connection_count(PoolTag::Raw), 2);
        assert_eq!(server.pool_size(PoolTag::Raw), 1);
    }

    #[test]
    fn geo_pool_only_receives_points_inside_its_box() {
        let server = server();
        let bbox = BoundingBox {
            min_lat: -10.0,
            max_lat: 10.0,
            min_lon: -10.0,
            max_lon: 10.0,
        };
        let (_id, mut rx) = server.subscribe(PoolTag::Geo, localhost(), Some(bbox)).unwrap();

        let inside = OutboundTrackEvent::from_message(
            &NormalizedMessage {
                mmsi: Some("1".into()),
                lat: Some(5.0),
                lon: Some(5.0),
                ..Default::default()
            },
            None,
        );
        let outside = OutboundTrackEvent::from_message(
            &NormalizedMessage {
                mmsi: Some("2".into()),
                lat: Some(50.0),
                lon: Some(50.0),
                ..Default::default()
            },
            None,
        );

        server.broadcast_track_update(&outside, None);
        assert!(rx.try_recv().is_err());

        server.broadcast_track_update(&inside, None);
        assert!(rx.try_recv().is_ok());
    }
}
