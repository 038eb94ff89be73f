//! Subscriber model: a tagged-variant handle per connected WebSocket client
//! (spec §3 Subscription, design note §9).
//!
//! `original_source/server/src/modules/websocket/websocket_server.py`
//! models this as four separate data structures (`all_connections`,
//! `watchlist_connections`, `geo_connections`, `geo_watchlist_connections`)
//! keyed directly on the raw WebSocket object. SPEC_FULL §9 resolves design
//! note §9's "Subscription should be one tagged-variant type, not four
//! parallel structures" by giving every subscriber a single `Subscriber`
//! struct carrying its pool tag and optional bounding box.

use std::net::IpAddr;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bbox::BoundingBox;

/// Which named pool a subscriber belongs to (spec §4.5, §6). `Raw` receives
/// every ingested message untouched; the others receive
/// `track_update`/`watchlist_alert` events post-dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTag {
    Raw,
    All,
    Watchlist,
    Geo,
    GeoWatchlist,
}

impl PoolTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolTag::Raw => "raw",
            PoolTag::All => "all",
            PoolTag::Watchlist => "watchlist",
            PoolTag::Geo => "geo",
            PoolTag::GeoWatchlist => "geo_watchlist",
        }
    }
}

pub struct Subscriber {
    pub id: Uuid,
    pub pool_tag: PoolTag,
    pub client_ip: IpAddr,
    /// Set for `Geo`/`GeoWatchlist` subscribers; the admission check
    /// rejects a missing box for those pools before a `Subscriber` is ever
    /// constructed.
    pub filter: Option<BoundingBox>,
    pub sender: mpsc::Sender<String>,
}

impl Subscriber {
    pub fn new(pool_tag: PoolTag, client_ip: IpAddr, filter: Option<BoundingBox>, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool_tag,
            client_ip,
            filter,
            sender,
        }
    }

    /// Never blocks: a full channel means a slow subscriber, and spec §4.5
    /// / design note §9 require the broadcast to never stall on one
    /// subscriber. Returns `false` when the send failed, signaling the
    /// caller to drop this subscriber.
    pub fn try_send(&self, payload: &str) -> bool {
        self.sender.try_send(payload.to_string()).is_ok()
    }
}
