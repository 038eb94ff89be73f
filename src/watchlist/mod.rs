pub mod client;
pub mod registry;
pub mod store;

pub use client::{AuthConfig, WatchlistClient, WatchlistClientConfig};
pub use registry::WatchlistRegistry;
pub use store::{DetectionRecord, InMemoryWatchlistStore, ListRecord, VesselRecord as WatchlistVesselRecord, WatchlistStore};
