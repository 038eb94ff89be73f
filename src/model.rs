//! Normalized message shape produced by the ingestion layer and consumed by
//! the dispatcher, plus the outbound wire event it's turned into.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel values AIS uses to mean "field not available". Any field that
/// decodes to one of these must be dropped rather than carried as a real
/// value (spec §3, §8 boundary behaviors).
pub mod sentinel {
    pub const LAT: f64 = 91.0;
    pub const LON: f64 = 181.0;
    pub const SPEED: f64 = 1023.0;
    pub const COURSE: f64 = 360.0;
    pub const HEADING: u32 = 511;
}

/// Message-class discriminant, typed over the raw AIS integer so the
/// dispatcher can match exhaustively while the wire field stays a plain
/// integer (SPEC_FULL §3 supplement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Position,
    StaticVoyage,
    Other(u8),
}

impl From<u8> for MessageClass {
    fn from(value: u8) -> Self {
        match value {
            1 | 2 | 3 | 18 | 19 => MessageClass::Position,
            5 => MessageClass::StaticVoyage,
            other => MessageClass::Other(other),
        }
    }
}

/// A message normalized from either the NMEA assembler or a WebSocket/JSON
/// source, ready for the dispatcher (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NormalizedMessage {
    pub mmsi: Option<String>,
    pub imo: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: u8,

    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub heading: Option<u32>,
    pub status: Option<u32>,

    pub name: Option<String>,
    pub callsign: Option<String>,
    pub shiptype: Option<u32>,
    pub length: Option<u32>,
    pub width: Option<u32>,

    #[serde(rename = "_source")]
    pub source: Option<String>,
    pub timestamp: Option<TimestampValue>,

    #[serde(rename = "isOwnShip", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_own_ship: bool,

    /// Unknown/forward-compatible keys seen in a raw JSON frame; not part
    /// of the typed shape but retained for the watchlist push-back path.
    #[serde(default, skip_serializing)]
    pub extras: HashMap<String, String>,
}

/// `timestamp` may arrive as an integer (epoch seconds) or an ISO-8601
/// string (spec §3). Both are accepted on the wire; normalized to epoch
/// seconds wherever the dedup key or vessel-state TTL logic needs a number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Epoch(i64),
    Iso(String),
}

impl TimestampValue {
    /// Best-effort conversion to epoch seconds. Per SPEC_FULL §9 open
    /// question, this is the only place normalization happens — the
    /// vessel-state `last_update` field still stores the original value
    /// verbatim, matching the source's behavior.
    pub fn as_epoch_secs(&self) -> Option<i64> {
        match self {
            TimestampValue::Epoch(v) => Some(*v),
            TimestampValue::Iso(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp()),
        }
    }
}

impl NormalizedMessage {
    pub fn class(&self) -> MessageClass {
        MessageClass::from(self.msg_type)
    }

    /// Apply sentinel-drop rules in place. Called once after raw decode,
    /// whether the source was NMEA or JSON (JSON sources are trusted to
    /// send real AIS values using the same sentinels upstream).
    pub fn drop_sentinels(&mut self) {
        if self.lat == Some(sentinel::LAT) || self.lon == Some(sentinel::LON) {
            self.lat = None;
            self.lon = None;
        }
        if self.speed == Some(sentinel::SPEED) {
            self.speed = None;
        }
        if self.course == Some(sentinel::COURSE) {
            self.course = None;
        }
        if self.heading == Some(sentinel::HEADING) {
            self.heading = None;
        }
        if let Some(cs) = &self.callsign {
            let trimmed = cs.trim_end();
            if trimmed.is_empty() {
                self.callsign = None;
            } else if trimmed.len() != cs.len() {
                self.callsign = Some(trimmed.to_string());
            }
        }
        if self.imo.as_deref() == Some("0") {
            self.imo = None;
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

/// Result of a watchlist lookup, attached to an outbound event (spec §3,
/// §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistMatch {
    pub list_id: String,
    pub list_name: Option<String>,
    pub color: Option<String>,
    pub matched_by: MatchedBy,
    /// Populated when the match came from IMO but the inbound message (or
    /// the registry's own record) also carries an MMSI (spec §4.4).
    pub mmsi: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedBy {
    Mmsi,
    Imo,
}

/// Outbound event fanned out to subscribers (spec §3, §6). Absent fields
/// are omitted from the wire, never null-stuffed.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundTrackEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub timestamp: String,
    pub mmsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shiptype: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchlist: Option<WatchlistMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
}

impl OutboundTrackEvent {
    pub fn from_message(message: &NormalizedMessage, watchlist: Option<WatchlistMatch>) -> Self {
        Self {
            event_type: "track_update",
            timestamp: chrono::Utc::now().to_rfc3339(),
            mmsi: message.mmsi.clone(),
            lat: message.lat,
            lon: message.lon,
            speed: message.speed,
            course: message.course,
            heading: message.heading,
            name: message.name.clone(),
            imo: message.imo.clone(),
            callsign: message.callsign.clone(),
            shiptype: message.shiptype,
            watchlist,
            list_id: None,
        }
    }

    /// `watchlist`-shaped events additionally carry `list_id` (spec §4.5).
    pub fn with_list_id(mut self) -> Self {
        self.list_id = self.watchlist.as_ref().map(|w| w.list_id.clone());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_position_sentinels() {
        let mut msg = NormalizedMessage {
            lat: Some(sentinel::LAT),
            lon: Some(sentinel::LON),
            speed: Some(sentinel::SPEED),
            course: Some(sentinel::COURSE),
            heading: Some(sentinel::HEADING),
            ..Default::default()
        };
        msg.drop_sentinels();
        assert!(msg.lat.is_none());
        assert!(msg.lon.is_none());
        assert!(msg.speed.is_none());
        assert!(msg.course.is_none());
        assert!(msg.heading.is_none());
    }

    #[test]
    fn keeps_real_position() {
        let mut msg = NormalizedMessage {
            lat: Some(45.0),
            lon: Some(-5.0),
            ..Default::default()
        };
        msg.drop_sentinels();
        assert_eq!(msg.lat, Some(45.0));
        assert_eq!(msg.lon, Some(-5.0));
        assert!(msg.has_position());
    }

    #[test]
    fn strips_trailing_whitespace_callsign_and_drops_if_empty() {
        let mut msg = NormalizedMessage {
            callsign: Some("ABCD   ".to_string()),
            ..Default::default()
        };
        msg.drop_sentinels();
        assert_eq!(msg.callsign.as_deref(), Some("ABCD"));

        let mut msg = NormalizedMessage {
            callsign: Some("   ".to_string()),
            ..Default::default()
        };
        msg.drop_sentinels();
        assert!(msg.callsign.is_none());
    }

    #[test]
    fn drops_zero_imo() {
        let mut msg = NormalizedMessage {
            imo: Some("0".to_string()),
            ..Default::default()
        };
        msg.drop_sentinels();
        assert!(msg.imo.is_none());
    }

    #[test]
    fn message_class_from_type() {
        assert_eq!(MessageClass::from(1), MessageClass::Position);
        assert_eq!(MessageClass::from(18), MessageClass::Position);
        assert_eq!(MessageClass::from(5), MessageClass::StaticVoyage);
        assert_eq!(MessageClass::from(24), MessageClass::Other(24));
    }

    #[test]
    fn timestamp_iso_converts_to_epoch() {
        let ts = TimestampValue::Iso("2024-01-01T00:00:00Z".to_string());
        assert_eq!(ts.as_epoch_secs(), Some(1_704_067_200));
    }

    #[test]
    fn outbound_event_omits_absent_fields() {
        let msg = NormalizedMessage {
            mmsi: Some("111".into()),
            ..Default::default()
        };
        let event = OutboundTrackEvent::from_message(&msg, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"lat\""));
        assert!(!json.contains("\"watchlist\""));
        assert!(json.contains("\"track_update\""));
    }
}
