pub mod admission;
pub mod server;
pub mod subscriber;

pub use admission::{AdmissionControl, AdmissionError};
pub use server::{FanoutServer, FanoutStats, FanoutStatsSnapshot};
pub use subscriber::{PoolTag, Subscriber};
