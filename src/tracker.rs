//! Flight state tracker: parses raw SBS records, merges them into a
//! per-aircraft current-state map, maintains the open/closed flight
//! lifecycle, and propagates updates to the cache and cold store. See
//! spec §4.3.

use crate::bus::Bus;
use crate::cache::Cache;
use crate::config::TrackConfig;
use crate::model::{AircraftState, Flight, merge};
use crate::sbs;
use crate::stats::{Stats, spawn_snapshot_task};
use crate::store::ColdStore;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const IDLE_TIMEOUT_MINUTES: i64 = 5;

/// Owns the per-aircraft current-state map and the per-aircraft
/// active-flight map, and drives the cache/cold-store propagation around
/// them.
pub struct Tracker {
    cache: Cache,
    store: ColdStore,
    stats: Arc<Stats>,
    current_states: Mutex<HashMap<String, AircraftState>>,
    active_flights: Mutex<HashMap<String, Flight>>,
}

impl Tracker {
    /// Bootstrap: load all active (open) flights from the cold store into
    /// the in-memory map and mirror each into the cache. A cache failure
    /// here is logged and tolerated; a cold-store failure is fatal (spec
    /// §4.3.1).
    pub async fn bootstrap(cache: Cache, store: ColdStore, stats: Arc<Stats>) -> Result<Self> {
        let flights = store
            .get_active_flights()
            .await
            .context("loading active flights from cold store")?;

        let mut active_flights = HashMap::new();
        for flight in flights {
            if let Err(e) = cache.set_flight(&flight).await {
                warn!(hex_ident = %flight.hex_ident, error = %e, "cache bootstrap mirror failed, tolerating");
            }
            active_flights.insert(flight.hex_ident.clone(), flight);
        }
        stats.set_active_flights(active_flights.len() as i64);
        info!(count = active_flights.len(), "bootstrapped active flights");

        Ok(Self {
            cache,
            store,
            stats,
            current_states: Mutex::new(HashMap::new()),
            active_flights: Mutex::new(active_flights),
        })
    }

    /// Process one raw record end to end (spec §4.3.2). Returns `Err`
    /// only for a cold-store write failure in the hot path — the caller
    /// treats that as "message unprocessed" and relies on the bus's
    /// redelivery policy (spec §7). Every other failure mode (parse
    /// failure, denylist, cache failure) is handled internally and
    /// returns `Ok`.
    pub async fn process_message(&self, message: &crate::model::SbsMessage) -> Result<()> {
        let start = Instant::now();
        self.stats.record_total();
        self.stats.touch_last_message(message.timestamp).await;

        let parsed = match sbs::parse(&message.raw, message.timestamp, &message.source) {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(()),
            Err(e) => {
                debug!(raw = %message.raw, error = %e, "parse failure");
                self.stats.record_failed();
                return Ok(());
            }
        };
        self.stats.record_parsed(parsed.msg_type);

        match self.cache.is_valid(&parsed.hex_ident).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(hex_ident = %parsed.hex_ident, "denylisted by validation cache, dropping");
                return Ok(());
            }
            Err(e) => warn!(hex_ident = %parsed.hex_ident, error = %e, "cache validation check failed, treating as valid"),
        }

        let merged = {
            let mut states = self.current_states.lock().await;
            match states.get_mut(&parsed.hex_ident) {
                Some(existing) => {
                    merge(existing, &parsed);
                    existing.clone()
                }
                None => {
                    states.insert(parsed.hex_ident.clone(), parsed.clone());
                    parsed.clone()
                }
            }
        };

        if let Err(e) = self.cache.set_aircraft(&merged).await {
            warn!(hex_ident = %merged.hex_ident, error = %e, "cache aircraft write failed, continuing");
        }
        self.store
            .store_state(&merged)
            .await
            .context("storing aircraft state")?;
        self.stats.record_stored();

        self.update_flight(&merged).await?;

        let active_aircraft = self.current_states.lock().await.len() as i64;
        let active_flights = self.active_flights.lock().await.len() as i64;
        self.stats.set_active_aircraft(active_aircraft);
        self.stats.set_active_flights(active_flights);
        self.stats.add_processing_time(start.elapsed());

        Ok(())
    }

    /// Flight update procedure (spec §4.3.3): find or create the active
    /// flight for this hex identifier, apply the new state, then close
    /// the flight if its timestamp is stale by more than 5 minutes.
    async fn update_flight(&self, state: &AircraftState) -> Result<()> {
        let cached = match self.cache.get_flight(&state.hex_ident).await {
            Ok(f) => f,
            Err(e) => {
                warn!(hex_ident = %state.hex_ident, error = %e, "cache flight lookup failed, falling back to in-memory");
                None
            }
        };

        let mut flights = self.active_flights.lock().await;
        let existing = match cached {
            Some(f) => Some(f),
            None => flights.get(&state.hex_ident).cloned(),
        };

        let mut flight = match existing {
            None => {
                let flight = Flight::start(Uuid::new_v4().to_string(), state);
                self.store
                    .create_flight(&flight)
                    .await
                    .context("creating flight")?;
                self.stats.record_flight_created();
                flight
            }
            Some(mut flight) => {
                flight.update(state);
                self.stats.record_flight_updated();
                flight
            }
        };

        let idle_cutoff = Utc::now() - chrono::Duration::minutes(IDLE_TIMEOUT_MINUTES);
        if state.timestamp < idle_cutoff {
            flight.ended_at = Some(state.timestamp);
            flights.remove(&state.hex_ident);
            drop(flights);

            self.current_states.lock().await.remove(&state.hex_ident);

            if let Err(e) = self.cache.del_flight(&state.hex_ident).await {
                warn!(hex_ident = %state.hex_ident, error = %e, "cache flight delete failed");
            }
            if let Err(e) = self.cache.del_aircraft(&state.hex_ident).await {
                warn!(hex_ident = %state.hex_ident, error = %e, "cache aircraft delete failed");
            }
            self.store
                .update_flight(&flight)
                .await
                .context("closing flight")?;
            self.stats.record_flight_ended();
        } else {
            flights.insert(state.hex_ident.clone(), flight.clone());
            drop(flights);
            if let Err(e) = self.cache.set_flight(&flight).await {
                warn!(hex_ident = %flight.hex_ident, error = %e, "cache flight mirror failed");
            }
        }

        Ok(())
    }
}

/// Run the tracker subcommand (spec §4.3, §5).
pub async fn run(config: TrackConfig, cancel: CancellationToken) -> Result<()> {
    let bus = Bus::connect(&config.nats_url).await?;
    let cache = Cache::connect(&config.redis_addr)
        .await
        .context("connecting to redis")?;
    let store = ColdStore::connect(&config.db_conn_str)
        .await
        .context("connecting to cold store")?;
    let stats = Stats::new();

    let tracker = Arc::new(
        Tracker::bootstrap(cache.clone(), store.clone(), stats.clone())
            .await
            .context("bootstrapping tracker")?,
    );

    let snapshot_handle = spawn_snapshot_task(stats.clone(), store.clone(), cancel.clone());
    let mut subscription = bus.subscribe("tracker").await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => {
                let Some(delivery) = next else { break };
                match delivery {
                    Ok(delivery) => {
                        match tracker.process_message(&delivery.message).await {
                            Ok(()) => delivery.ack().await,
                            Err(e) => {
                                error!(error = %e, "cold-store write failed, requesting redelivery");
                                delivery.nak().await;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to decode delivered message"),
                }
            }
        }
    }

    let _ = snapshot_handle.await;
    bus.close().await?;
    store.close().await?;
    cache.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SbsMessage;
    use chrono::TimeZone;

    fn ts(offset_secs: i64) -> chrono::DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_secs)
    }

    #[test]
    fn flight_termination_threshold_matches_spec() {
        // The tracker closes a flight when the arriving message's own
        // timestamp is more than 5 minutes behind wall clock, regardless
        // of when the message is actually processed (spec §4.3.3, §9).
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let stale = now - chrono::Duration::minutes(6);
        let fresh = now - chrono::Duration::minutes(1);
        let cutoff = now - chrono::Duration::minutes(IDLE_TIMEOUT_MINUTES);
        assert!(stale < cutoff);
        assert!(fresh >= cutoff);
    }

    #[test]
    fn sbs_message_round_trips_through_json() {
        let message = SbsMessage {
            raw: "MSG,3,0,0,0,ABC123,0,,,,,".to_string(),
            timestamp: ts(0),
            source: "127.0.0.1:30003".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        let decoded: SbsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(message.raw, decoded.raw);
        assert_eq!(message.source, decoded.source);
        assert_eq!(
            message.timestamp.timestamp_millis(),
            decoded.timestamp.timestamp_millis()
        );
    }
}
