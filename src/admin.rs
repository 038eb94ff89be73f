//! Administrative/control-plane surface (spec §1 Non-goals: the HTTP admin
//! UI itself is an external collaborator, out of scope for this crate).
//!
//! SPEC_FULL §1 keeps the boundary alive as a trait so an admin HTTP
//! service — in another crate, or a future `axum` router in this one — can
//! observe the runtime without reaching into its internals.

use std::sync::Arc;

use crate::dispatcher::DispatcherStats;
use crate::fanout::{FanoutStatsSnapshot, PoolTag};
use crate::runtime::Runtime;
use crate::source::SourceStatsSnapshot;

pub struct PoolSizes {
    pub raw: usize,
    pub all: usize,
    pub watchlist: usize,
    pub geo: usize,
    pub geo_watchlist: usize,
}

pub trait AdminOps: Send + Sync {
    fn dispatcher_stats(&self) -> Arc<DispatcherStats>;
    fn source_stats(&self, source_name: &str) -> Option<SourceStatsSnapshot>;
    fn pool_sizes(&self) -> PoolSizes;
    fn fanout_stats(&self) -> FanoutStatsSnapshot;
    fn vessel_counts(&self) -> (usize, usize);
}

impl AdminOps for Runtime {
    fn dispatcher_stats(&self) -> Arc<DispatcherStats> {
        self.dispatcher.stats()
    }

    fn source_stats(&self, source_name: &str) -> Option<SourceStatsSnapshot> {
        Runtime::source_stats(self, source_name)
    }

    fn pool_sizes(&self) -> PoolSizes {
        PoolSizes {
            raw: self.fanout.pool_size(PoolTag::Raw),
            all: self.fanout.pool_size(PoolTag::All),
            watchlist: self.fanout.pool_size(PoolTag::Watchlist),
            geo: self.fanout.pool_size(PoolTag::Geo),
            geo_watchlist: self.fanout.pool_size(PoolTag::GeoWatchlist),
        }
    }

    fn fanout_stats(&self) -> FanoutStatsSnapshot {
        self.fanout.stats().snapshot()
    }

    fn vessel_counts(&self) -> (usize, usize) {
        (self.vessels.active_count(), self.vessels.record_count())
    }
}
