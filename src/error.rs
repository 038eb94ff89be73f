//! Crate-wide error types (spec §7).
//!
//! Grounded on the teacher's choice of `thiserror` for typed, named error
//! variants at module boundaries and `anyhow` for task-boundary propagation
//! where the caller only needs to log and move on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetwatchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source adapter error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("watchlist provider error: {0}")]
    Watchlist(#[from] crate::watchlist::client::WatchlistClientError),

    #[error("bounding box error: {0}")]
    BoundingBox(#[from] crate::bbox::BoundingBoxError),

    #[error("admission rejected: {0}")]
    Admission(#[from] crate::fanout::AdmissionError),
}
