//! Parser for the SBS-1 "Basestation" text format (spec §4.4).
//!
//! A record is at least 22 comma-separated fields. Field 0 is the message
//! category ("MSG", "SEL", "ID", ...); field 1 is the numeric message type
//! (1-9); field 4 is the hex identifier; fields 10-17 and 21 carry state
//! depending on message type.

use crate::model::AircraftState;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

const MIN_FIELDS: usize = 22;

const F_TYPE: usize = 1;
const F_HEX: usize = 4;
const F_CALLSIGN: usize = 10;
const F_ALTITUDE: usize = 11;
const F_GROUND_SPEED: usize = 12;
const F_TRACK: usize = 13;
const F_LATITUDE: usize = 14;
const F_LONGITUDE: usize = 15;
const F_VERTICAL_RATE: usize = 16;
const F_SQUAWK: usize = 17;
const F_ON_GROUND: usize = 21;

/// Parse one raw SBS record into a partial [`AircraftState`].
///
/// Returns `Ok(None)` for message types that carry no state (1, 2) per spec
/// §4.4 — this is not an error. Returns `Err` for any envelope-level parse
/// failure: fewer than 22 fields, a non-numeric type, or a type outside
/// 1-9. Within type 8, individual numeric-parse failures on optional
/// fields are silently skipped (the field stays at its zero value).
pub fn parse(raw: &str, timestamp: DateTime<Utc>, source: &str) -> Result<Option<AircraftState>> {
    let fields: Vec<&str> = raw.split(',').collect();
    if fields.len() < MIN_FIELDS {
        bail!(
            "SBS record has {} fields, need at least {}",
            fields.len(),
            MIN_FIELDS
        );
    }

    let msg_type: u8 = fields[F_TYPE]
        .trim()
        .parse()
        .with_context(|| format!("non-numeric message type {:?}", fields[F_TYPE]))?;

    let hex_ident = fields[F_HEX].trim().to_uppercase();

    match msg_type {
        1 | 2 => Ok(None),
        3 => Ok(Some(AircraftState::envelope(
            hex_ident,
            msg_type,
            timestamp,
            source.to_string(),
        ))),
        4 => {
            let mut state = AircraftState::envelope(hex_ident, msg_type, timestamp, source.to_string());
            let callsign = fields[F_CALLSIGN].trim();
            if !callsign.is_empty() {
                state.callsign = Some(callsign.to_string());
            }
            Ok(Some(state))
        }
        5 => {
            let mut state = AircraftState::envelope(hex_ident, msg_type, timestamp, source.to_string());
            state.altitude = parse_optional(fields[F_ALTITUDE]).unwrap_or(0);
            Ok(Some(state))
        }
        6 => {
            let mut state = AircraftState::envelope(hex_ident, msg_type, timestamp, source.to_string());
            state.ground_speed = parse_optional(fields[F_GROUND_SPEED]).unwrap_or(0.0);
            Ok(Some(state))
        }
        7 => {
            let mut state = AircraftState::envelope(hex_ident, msg_type, timestamp, source.to_string());
            state.track = parse_optional(fields[F_TRACK]).unwrap_or(0.0);
            Ok(Some(state))
        }
        8 => {
            let mut state = AircraftState::envelope(hex_ident, msg_type, timestamp, source.to_string());
            state.altitude = parse_optional(fields[F_ALTITUDE]).unwrap_or(0);
            state.ground_speed = parse_optional(fields[F_GROUND_SPEED]).unwrap_or(0.0);
            state.track = parse_optional(fields[F_TRACK]).unwrap_or(0.0);
            state.latitude = parse_optional(fields[F_LATITUDE]).unwrap_or(0.0);
            state.longitude = parse_optional(fields[F_LONGITUDE]).unwrap_or(0.0);
            state.vertical_rate = parse_optional(fields[F_VERTICAL_RATE]).unwrap_or(0);
            state.squawk = pad_squawk(fields[F_SQUAWK].trim());
            state.on_ground = fields.get(F_ON_GROUND).map(|f| f.trim() == "1").unwrap_or(false);
            Ok(Some(state))
        }
        9 => {
            let mut state = AircraftState::envelope(hex_ident, msg_type, timestamp, source.to_string());
            state.on_ground = fields.get(F_ON_GROUND).map(|f| f.trim() == "1").unwrap_or(false);
            Ok(Some(state))
        }
        _ => bail!("unknown SBS message type {}", msg_type),
    }
}

/// Parse an optional numeric field; returns `None` (leaving the caller's
/// zero default) on any parse failure rather than propagating an error.
fn parse_optional<T: std::str::FromStr>(field: &str) -> Option<T> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Zero-pad a squawk code to 4 digits. Empty input stays empty ("absent").
fn pad_squawk(field: &str) -> String {
    if field.is_empty() {
        String::new()
    } else {
        format!("{:0>4}", field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    /// Build a 22-field SBS record from explicit field values, avoiding
    /// manual comma counting. `overrides` sets field index -> value;
    /// everything else defaults to "1" (fields 0..9) or "" (fields 10..21).
    fn record(msg_type: &str, hex: &str, overrides: &[(usize, &str)]) -> String {
        let mut fields: Vec<String> = (0..MIN_FIELDS)
            .map(|i| if i < 10 { "1".to_string() } else { String::new() })
            .collect();
        fields[0] = "MSG".to_string();
        fields[F_TYPE] = msg_type.to_string();
        fields[F_HEX] = hex.to_string();
        for &(idx, val) in overrides {
            fields[idx] = val.to_string();
        }
        fields.join(",")
    }

    #[test]
    fn type_1_and_2_yield_no_state() {
        assert!(parse(&record("1", "ABC123", &[]), ts(), "s").unwrap().is_none());
        assert!(parse(&record("2", "ABC123", &[]), ts(), "s").unwrap().is_none());
    }

    #[test]
    fn fewer_than_22_fields_fails() {
        assert!(parse("MSG,3,0,0,0,ABC123,0,,,,,", ts(), "s").is_err());
    }

    #[test]
    fn unknown_type_fails() {
        assert!(parse(&record("10", "ABC123", &[]), ts(), "s").is_err());
    }

    #[test]
    fn non_numeric_type_fails() {
        assert!(parse(&record("X", "ABC123", &[]), ts(), "s").is_err());
    }

    #[test]
    fn type_8_missing_on_ground_leaves_false_and_parses() {
        let raw = record(
            "8",
            "ABC123",
            &[
                (F_CALLSIGN, "CALL"),
                (F_ALTITUDE, "10000"),
                (F_GROUND_SPEED, "450"),
                (F_TRACK, "90"),
                (F_LATITUDE, "40.0"),
                (F_LONGITUDE, "-74.0"),
                (F_VERTICAL_RATE, "0"),
                (F_SQUAWK, "1200"),
            ],
        );
        let state = parse(&raw, ts(), "s").unwrap().unwrap();
        assert_eq!(state.hex_ident, "ABC123");
        assert_eq!(state.altitude, 10000);
        assert_eq!(state.ground_speed, 450.0);
        assert_eq!(state.track, 90.0);
        assert_eq!(state.latitude, 40.0);
        assert_eq!(state.longitude, -74.0);
        assert_eq!(state.vertical_rate, 0);
        assert_eq!(state.squawk, "1200");
        assert!(!state.on_ground);
    }

    #[test]
    fn type_8_individual_field_failures_are_skipped() {
        let raw = record(
            "8",
            "ABC123",
            &[(F_ALTITUDE, "notanumber"), (F_GROUND_SPEED, "450")],
        );
        let state = parse(&raw, ts(), "s").unwrap().unwrap();
        assert_eq!(state.altitude, 0);
        assert_eq!(state.ground_speed, 450.0);
    }

    #[test]
    fn squawk_is_zero_padded() {
        let raw = record("8", "ABC123", &[(F_SQUAWK, "7")]);
        let state = parse(&raw, ts(), "s").unwrap().unwrap();
        assert_eq!(state.squawk, "0007");
    }

    #[test]
    fn type_9_extracts_on_ground() {
        let raw = record("9", "ABC123", &[(F_ON_GROUND, "1")]);
        let state = parse(&raw, ts(), "s").unwrap().unwrap();
        assert!(state.on_ground);
    }

    #[test]
    fn hex_ident_is_uppercased() {
        let raw = record("3", "abc123", &[]);
        let state = parse(&raw, ts(), "s").unwrap().unwrap();
        assert_eq!(state.hex_ident, "ABC123");
    }
}
