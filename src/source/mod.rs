pub mod adapter;
pub mod tcp;
pub mod ws;

pub use adapter::{ConnState, SourceConfig, SourceKind, SourceStats, SourceStatsSnapshot};
