//! Core data types shared by the ingestor, archiver, and tracker: the raw bus
//! payload, the parsed-but-partial aircraft state, and the flight session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw SBS text record tagged with receipt metadata, as published on
/// `sbs.raw`. See spec §3, §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbsMessage {
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Partial aircraft state produced by a single parsed SBS record, and the
/// representative merged into the tracker's current-state map.
///
/// Every field except `hex_ident`, `msg_type`, and `timestamp` may be
/// "absent", represented by the zero value of its type (empty string,
/// `0`, `0.0`, `false`). The merge rule in [`merge`] treats zero as "no
/// update" for every overwriteable field except `on_ground` and
/// `timestamp`, which are always overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftState {
    pub hex_ident: String,
    pub callsign: Option<String>,
    pub altitude: i32,
    pub ground_speed: f32,
    pub track: f32,
    pub latitude: f64,
    pub longitude: f64,
    pub vertical_rate: i32,
    pub squawk: String,
    pub on_ground: bool,
    pub msg_type: u8,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl AircraftState {
    /// A state carrying only the envelope (hex, type, timestamp) — what a
    /// "no extra fields" message type (3 or 9 sans on_ground) contributes.
    pub fn envelope(hex_ident: String, msg_type: u8, timestamp: DateTime<Utc>, source: String) -> Self {
        Self {
            hex_ident,
            msg_type,
            timestamp,
            source,
            ..Default::default()
        }
    }
}

/// Merge a newly parsed partial state `n` into an existing tracked state `e`
/// for the same hex identifier, in place. See spec §4.4.
pub fn merge(e: &mut AircraftState, n: &AircraftState) {
    if let Some(ref callsign) = n.callsign {
        if !callsign.is_empty() {
            e.callsign = Some(callsign.clone());
        }
    }
    if n.altitude != 0 {
        e.altitude = n.altitude;
    }
    if n.ground_speed != 0.0 {
        e.ground_speed = n.ground_speed;
    }
    if n.track != 0.0 {
        e.track = n.track;
    }
    if n.latitude != 0.0 {
        e.latitude = n.latitude;
    }
    if n.longitude != 0.0 {
        e.longitude = n.longitude;
    }
    if n.vertical_rate != 0 {
        e.vertical_rate = n.vertical_rate;
    }
    if !n.squawk.is_empty() {
        e.squawk = n.squawk.clone();
    }
    e.on_ground = n.on_ground;
    e.timestamp = n.timestamp;
    if !n.source.is_empty() {
        e.source = n.source.clone();
    }
    e.msg_type = n.msg_type;
}

/// A contiguous period during which a given hex identifier is being
/// observed. See spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub session_id: String,
    pub hex_ident: String,
    pub callsign: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub first_latitude: f64,
    pub first_longitude: f64,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub max_altitude: i32,
    pub max_ground_speed: f32,
}

impl Flight {
    /// Start a new flight session for a hex identifier from its first
    /// accepted state. See spec §4.3.3.
    pub fn start(session_id: String, state: &AircraftState) -> Self {
        Self {
            session_id,
            hex_ident: state.hex_ident.clone(),
            callsign: state.callsign.clone(),
            started_at: state.timestamp,
            ended_at: None,
            first_latitude: state.latitude,
            first_longitude: state.longitude,
            last_latitude: state.latitude,
            last_longitude: state.longitude,
            max_altitude: state.altitude,
            max_ground_speed: state.ground_speed,
        }
    }

    /// Apply a subsequent accepted state: update last position and take the
    /// running maximum of altitude and ground speed. max_altitude and
    /// max_ground_speed are monotonic non-decreasing for the flight's
    /// lifetime.
    pub fn update(&mut self, state: &AircraftState) {
        if let Some(ref callsign) = state.callsign {
            if !callsign.is_empty() {
                self.callsign = Some(callsign.clone());
            }
        }
        if state.latitude != 0.0 {
            self.last_latitude = state.latitude;
        }
        if state.longitude != 0.0 {
            self.last_longitude = state.longitude;
        }
        if state.altitude != 0 && state.altitude > self.max_altitude {
            self.max_altitude = state.altitude;
        }
        if state.ground_speed != 0.0 && state.ground_speed > self.max_ground_speed {
            self.max_ground_speed = state.ground_speed;
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn merge_preserves_non_zero_fields() {
        let mut existing = AircraftState {
            hex_ident: "ABC123".into(),
            callsign: Some("OLD".into()),
            altitude: 10000,
            ground_speed: 400.0,
            msg_type: 4,
            timestamp: ts(0),
            ..Default::default()
        };
        let incoming = AircraftState {
            hex_ident: "ABC123".into(),
            callsign: Some("NEW".into()),
            altitude: 11000,
            track: 90.0,
            msg_type: 8,
            timestamp: ts(5),
            ..Default::default()
        };
        merge(&mut existing, &incoming);
        assert_eq!(existing.callsign.as_deref(), Some("NEW"));
        assert_eq!(existing.altitude, 11000);
        assert_eq!(existing.ground_speed, 400.0);
        assert_eq!(existing.track, 90.0);
        assert_eq!(existing.timestamp, ts(5));
    }

    #[test]
    fn merge_always_overwrites_on_ground_and_timestamp() {
        let mut existing = AircraftState {
            on_ground: true,
            timestamp: ts(0),
            ..Default::default()
        };
        let incoming = AircraftState {
            on_ground: false,
            timestamp: ts(1),
            ..Default::default()
        };
        merge(&mut existing, &incoming);
        assert!(!existing.on_ground);
        assert_eq!(existing.timestamp, ts(1));
    }

    #[test]
    fn flight_max_altitude_is_monotonic() {
        let base = AircraftState {
            hex_ident: "ABC123".into(),
            altitude: 5000,
            timestamp: ts(0),
            ..Default::default()
        };
        let mut flight = Flight::start("s1".into(), &base);
        flight.update(&AircraftState {
            altitude: 3000,
            ..Default::default()
        });
        assert_eq!(flight.max_altitude, 5000);
        flight.update(&AircraftState {
            altitude: 9000,
            ..Default::default()
        });
        assert_eq!(flight.max_altitude, 9000);
    }
}
