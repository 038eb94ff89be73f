//! Bounding box subscriptions: validation and the antimeridian-aware
//! point-in-box test (spec §3, §4.5, §8).
//!
//! Grounded on
//! `original_source/server/src/modules/websocket/websocket_server.py::ConnectionManager.is_point_in_box`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BoundingBoxError {
    #[error("min_lat ({min_lat}) must be less than max_lat ({max_lat})")]
    InvalidLatRange { min_lat: f64, max_lat: f64 },
    #[error("latitude out of range [-90, 90]")]
    LatOutOfRange,
    #[error("longitude out of range [-180, 180]")]
    LonOutOfRange,
}

impl BoundingBox {
    /// Admission-time validation (spec §4.5 step 4): `-90 <= min_lat <
    /// max_lat <= 90`, longitudes in `[-180, 180]`. `min_lon == max_lon` is
    /// allowed (a zero-width wrap is degenerate but not rejected by the
    /// spec); `min_lat == max_lat` is rejected (spec §8 boundary behavior).
    pub fn validate(&self) -> Result<(), BoundingBoxError> {
        if !(self.min_lat >= -90.0 && self.min_lat <= 90.0)
            || !(self.max_lat >= -90.0 && self.max_lat <= 90.0)
        {
            return Err(BoundingBoxError::LatOutOfRange);
        }
        if self.min_lat >= self.max_lat {
            return Err(BoundingBoxError::InvalidLatRange {
                min_lat: self.min_lat,
                max_lat: self.max_lat,
            });
        }
        if !(-180.0..=180.0).contains(&self.min_lon) || !(-180.0..=180.0).contains(&self.max_lon) {
            return Err(BoundingBoxError::LonOutOfRange);
        }
        Ok(())
    }

    /// Point-in-box test. Longitude wraps the antimeridian when
    /// `min_lon > max_lon` (spec §3, §4.5, §8 invariant #7).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        if !(self.min_lat <= lat && lat <= self.max_lat) {
            return false;
        }

        if self.min_lon <= self.max_lon {
            self.min_lon <= lon && lon <= self.max_lon
        } else {
            lon >= self.min_lon || lon <= self.max_lon
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_equal_lat_bounds() {
        let bbox = BoundingBox {
            min_lat: 10.0,
            max_lat: 10.0,
            min_lon: -10.0,
            max_lon: 10.0,
        };
        assert_eq!(
            bbox.validate(),
            Err(BoundingBoxError::InvalidLatRange {
                min_lat: 10.0,
                max_lat: 10.0
            })
        );
    }

    #[test]
    fn rejects_out_of_range_lat() {
        let bbox = BoundingBox {
            min_lat: -95.0,
            max_lat: 10.0,
            min_lon: -10.0,
            max_lon: 10.0,
        };
        assert_eq!(bbox.validate(), Err(BoundingBoxError::LatOutOfRange));
    }

    #[test]
    fn accepts_normal_box() {
        let bbox = BoundingBox {
            min_lat: -10.0,
            max_lat: 10.0,
            min_lon: -10.0,
            max_lon: 10.0,
        };
        assert!(bbox.validate().is_ok());
    }

    #[test]
    fn s4_antimeridian_filtering() {
        let bbox = BoundingBox {
            min_lat: -10.0,
            max_lat: 10.0,
            min_lon: 170.0,
            max_lon: -170.0,
        };
        assert!(bbox.validate().is_ok());
        assert!(bbox.contains(0.0, 175.0));
        assert!(!bbox.contains(0.0, 0.0));
        assert!(bbox.contains(0.0, -175.0));
    }

    #[test]
    fn invariant_7_swapping_lon_bounds_yields_complement() {
        let normal = BoundingBox {
            min_lat: -10.0,
            max_lat: 10.0,
            min_lon: -170.0,
            max_lon: 170.0,
        };
        let swapped = BoundingBox {
            min_lon: 170.0,
            max_lon: -170.0,
            ..normal
        };

        // -170.0/170.0 themselves are excluded: both branches are inclusive
        // at the seam, so the normal and swapped boxes both contain those
        // two longitudes rather than disagreeing on them.
        for lon in [-179.0, -171.0, 0.0, 171.0, 179.0] {
            assert_ne!(normal.contains(0.0, lon), swapped.contains(0.0, lon));
        }
    }

    #[test]
    fn normal_box_excludes_outside_point() {
        let bbox = BoundingBox {
            min_lat: 0.0,
            max_lat: 10.0,
            min_lon: 0.0,
            max_lon: 10.0,
        };
        assert!(!bbox.contains(20.0, 5.0));
        assert!(!bbox.contains(5.0, 20.0));
    }
}
