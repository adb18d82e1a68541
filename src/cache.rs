//! Key-value cache client: key naming, TTL policy, and JSON codec against
//! Redis. See spec §6. The cache is advisory throughout the tracker — every
//! call site treats a cache error as "degraded, proceed" (spec §7).

use crate::model::{AircraftState, Flight};
use anyhow::{Context, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const FLIGHT_TTL_SECONDS: u64 = 24 * 3600;
const AIRCRAFT_TTL_SECONDS: u64 = 3600;

fn flight_key(hex_ident: &str) -> String {
    format!("flight:{}", hex_ident)
}

fn aircraft_key(hex_ident: &str) -> String {
    format!("aircraft:{}", hex_ident)
}

fn validation_key(hex_ident: &str) -> String {
    format!("validation:{}", hex_ident)
}

/// Redis-backed cache client.
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    pub async fn connect(addr: &str) -> Result<Self> {
        let client = redis::Client::open(addr).with_context(|| format!("parsing REDIS_ADDR {}", addr))?;
        let conn = client
            .get_connection_manager()
            .await
            .with_context(|| format!("connecting to redis at {}", addr))?;
        Ok(Self { conn })
    }

    pub async fn get_flight(&self, hex_ident: &str) -> Result<Option<Flight>> {
        let raw: Option<String> = self.conn.clone().get(flight_key(hex_ident)).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s).context("decoding cached Flight JSON")?),
            None => None,
        })
    }

    pub async fn set_flight(&self, flight: &Flight) -> Result<()> {
        let payload = serde_json::to_string(flight).context("encoding Flight JSON")?;
        self.conn
            .clone()
            .set_ex::<_, _, ()>(flight_key(&flight.hex_ident), payload, FLIGHT_TTL_SECONDS)
            .await?;
        Ok(())
    }

    pub async fn del_flight(&self, hex_ident: &str) -> Result<()> {
        self.conn.clone().del::<_, ()>(flight_key(hex_ident)).await?;
        Ok(())
    }

    pub async fn get_aircraft(&self, hex_ident: &str) -> Result<Option<AircraftState>> {
        let raw: Option<String> = self.conn.clone().get(aircraft_key(hex_ident)).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s).context("decoding cached AircraftState JSON")?),
            None => None,
        })
    }

    pub async fn set_aircraft(&self, state: &AircraftState) -> Result<()> {
        let payload = serde_json::to_string(state).context("encoding AircraftState JSON")?;
        self.conn
            .clone()
            .set_ex::<_, _, ()>(aircraft_key(&state.hex_ident), payload, AIRCRAFT_TTL_SECONDS)
            .await?;
        Ok(())
    }

    pub async fn del_aircraft(&self, hex_ident: &str) -> Result<()> {
        self.conn.clone().del::<_, ()>(aircraft_key(hex_ident)).await?;
        Ok(())
    }

    /// Returns whether `hex_ident` is permitted to be tracked. Absence of
    /// the key means valid (spec §4.3.2 step 4).
    pub async fn is_valid(&self, hex_ident: &str) -> Result<bool> {
        let raw: Option<String> = self.conn.clone().get(validation_key(hex_ident)).await?;
        Ok(raw.map(|v| v != "0").unwrap_or(true))
    }

    /// Close the cache connection (last in the shutdown order of spec §5).
    pub async fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_naming_matches_schema() {
        assert_eq!(flight_key("ABC123"), "flight:ABC123");
        assert_eq!(aircraft_key("ABC123"), "aircraft:ABC123");
        assert_eq!(validation_key("ABC123"), "validation:ABC123");
    }
}
