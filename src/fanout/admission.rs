//! Connection admission control (spec §4.5, §8 boundary behaviors).
//!
//! Grounded on
//! `original_source/server/src/modules/websocket/websocket_server.py::ConnectionManager._check_rate_limit`
//! (per-IP connection cap, then a sliding-window rate limit). Pool capacity
//! and bounding-box validation are SPEC_FULL §4.5 additions the Python side
//! doesn't enforce explicitly but the spec names as admission steps.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::bbox::{BoundingBox, BoundingBoxError};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AdmissionError {
    #[error("connection limit ({0}) reached for this client IP")]
    PerIpConnectionLimit(u32),
    #[error("rate limit exceeded for this client IP")]
    RateLimited,
    #[error("pool is at capacity ({0})")]
    PoolAtCapacity(usize),
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(#[from] BoundingBoxError),
}

pub struct AdmissionControl {
    max_connections_per_ip: u32,
    rate_limit_window: Duration,
    rate_limit_max_events: u32,
    pool_capacity: usize,

    connections_per_ip: Mutex<HashMap<IpAddr, u32>>,
    rate_windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl AdmissionControl {
    pub fn new(
        max_connections_per_ip: u32,
        rate_limit_window: Duration,
        rate_limit_max_events: u32,
        pool_capacity: usize,
    ) -> Self {
        Self {
            max_connections_per_ip,
            rate_limit_window,
            rate_limit_max_events,
            pool_capacity,
            connections_per_ip: Mutex::new(HashMap::new()),
            rate_windows: Mutex::new(HashMap::new()),
        }
    }

    /// Runs all four admission checks in spec order: per-IP cap, per-IP
    /// rate limit, pool capacity, bounding-box validation. The first
    /// failure short-circuits the rest.
    pub fn admit(
        &self,
        ip: IpAddr,
        current_pool_size: usize,
        bbox: Option<&BoundingBox>,
    ) -> Result<(), AdmissionError> {
        self.check_connection_cap(ip)?;
        self.check_rate_limit(ip)?;
        if current_pool_size >= self.pool_capacity {
            return Err(AdmissionError::PoolAtCapacity(self.pool_capacity));
        }
        if let Some(bbox) = bbox {
            bbox.validate()?;
        }
        Ok(())
    }

    fn check_connection_cap(&self, ip: IpAddr) -> Result<(), AdmissionError> {
        let counts = self.connections_per_ip.lock().unwrap();
        let current = counts.get(&ip).copied().unwrap_or(0);
        if current >= self.max_connections_per_ip {
            return Err(AdmissionError::PerIpConnectionLimit(self.max_connections_per_ip));
        }
        Ok(())
    }

    fn check_rate_limit(&self, ip: IpAddr) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let mut windows = self.rate_windows.lock().unwrap();
        let window = windows.entry(ip).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) > self.rate_limit_window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u32 >= self.rate_limit_max_events {
            return Err(AdmissionError::RateLimited);
        }
        window.push_back(now);
        Ok(())
    }

    pub fn record_connect(&self, ip: IpAddr) {
        *self.connections_per_ip.lock().unwrap().entry(ip).or_insert(0) += 1;
    }

    pub fn record_disconnect(&self, ip: IpAddr) {
        let mut counts = self.connections_per_ip.lock().unwrap();
        if let Some(count) = counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&ip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn rejects_beyond_per_ip_connection_cap() {
        let admission = AdmissionControl::new(1, Duration::from_secs(60), 100, 100);
        admission.record_connect(ip());
        assert_eq!(
            admission.admit(ip(), 0, None),
            Err(AdmissionError::PerIpConnectionLimit(1))
        );
    }

    #[test]
    fn rejects_beyond_rate_limit() {
        let admission = AdmissionControl::new(100, Duration::from_secs(60), 2, 100);
        assert!(admission.admit(ip(), 0, None).is_ok());
        assert!(admission.admit(ip(), 0, None).is_ok());
        assert_eq!(admission.admit(ip(), 0, None), Err(AdmissionError::RateLimited));
    }

    #[test]
    fn rejects_when_pool_at_capacity() {
        let admission = AdmissionControl::new(100, Duration::from_secs(60), 100, 2);
        assert_eq!(admission.admit(ip(), 2, None), Err(AdmissionError::PoolAtCapacity(2)));
        assert!(admission.admit(ip(), 1, None).is_ok());
    }

    #[test]
    fn propagates_bbox_validation_error() {
        let admission = AdmissionControl::new(100, Duration::from_secs(60), 100, 100);
        let bad_bbox = BoundingBox {
            min_lat: 10.0,
            max_lat: 10.0,
            min_lon: -10.0,
            max_lon: 10.0,
        };
        assert!(matches!(
            admission.admit(ip(), 0, Some(&bad_bbox)),
            Err(AdmissionError::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn connect_disconnect_releases_the_cap_slot() {
        let admission = AdmissionControl::new(1, Duration::from_secs(60), 100, 100);
        admission.record_connect(ip());
        admission.record_disconnect(ip());
        assert!(admission.admit(ip(), 0, None).is_ok());
    }
}
