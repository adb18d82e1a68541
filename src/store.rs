//! Cold store: the time-series extension of a relational database holding
//! `aircraft_states`, `flights`, and `system_stats` (spec §6). The database
//! itself is a collaborator; this module specifies the schema and the
//! operations the tracker invokes — `get_active_flights`, `create_flight`,
//! `update_flight`, `store_state`, plus the statistics snapshot write.

use crate::model::{AircraftState, Flight};
use crate::schema::{aircraft_states, flights, system_stats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Insertable)]
#[diesel(table_name = aircraft_states)]
struct NewAircraftState {
    time: DateTime<Utc>,
    hex_ident: String,
    callsign: Option<String>,
    altitude: i32,
    ground_speed: i32,
    track: i32,
    latitude: f64,
    longitude: f64,
    vertical_rate: i32,
    squawk: Option<String>,
    on_ground: bool,
    msg_type: i32,
    source: String,
}

impl From<&AircraftState> for NewAircraftState {
    fn from(s: &AircraftState) -> Self {
        Self {
            time: s.timestamp,
            hex_ident: s.hex_ident.clone(),
            callsign: s.callsign.clone(),
            altitude: s.altitude,
            ground_speed: s.ground_speed.round() as i32,
            track: s.track.round() as i32,
            latitude: s.latitude,
            longitude: s.longitude,
            vertical_rate: s.vertical_rate,
            squawk: if s.squawk.is_empty() { None } else { Some(s.squawk.clone()) },
            on_ground: s.on_ground,
            msg_type: s.msg_type as i32,
            source: s.source.clone(),
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = flights)]
struct FlightRow {
    session_id: String,
    hex_ident: String,
    callsign: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    first_latitude: f64,
    first_longitude: f64,
    last_latitude: f64,
    last_longitude: f64,
    max_altitude: i32,
    max_ground_speed: i32,
}

impl From<&Flight> for FlightRow {
    fn from(f: &Flight) -> Self {
        Self {
            session_id: f.session_id.clone(),
            hex_ident: f.hex_ident.clone(),
            callsign: f.callsign.clone(),
            started_at: f.started_at,
            ended_at: f.ended_at,
            first_latitude: f.first_latitude,
            first_longitude: f.first_longitude,
            last_latitude: f.last_latitude,
            last_longitude: f.last_longitude,
            max_altitude: f.max_altitude,
            max_ground_speed: f.max_ground_speed.round() as i32,
        }
    }
}

impl From<FlightRow> for Flight {
    fn from(r: FlightRow) -> Self {
        Self {
            session_id: r.session_id,
            hex_ident: r.hex_ident,
            callsign: r.callsign,
            started_at: r.started_at,
            ended_at: r.ended_at,
            first_latitude: r.first_latitude,
            first_longitude: r.first_longitude,
            last_latitude: r.last_latitude,
            last_longitude: r.last_longitude,
            max_altitude: r.max_altitude,
            max_ground_speed: r.max_ground_speed as f32,
        }
    }
}

/// A point-in-time statistics snapshot (spec §4.3.4, §6).
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub time: DateTime<Utc>,
    pub total_messages: i64,
    pub parsed_messages: i64,
    pub failed_messages: i64,
    pub stored_states: i64,
    pub created_flights: i64,
    pub updated_flights: i64,
    pub ended_flights: i64,
    pub active_aircraft: i64,
    pub active_flights: i64,
    pub message_types: [i64; 10],
    pub processing_time_ms: i64,
    pub uptime_seconds: i64,
}

#[derive(Insertable)]
#[diesel(table_name = system_stats)]
struct NewSystemStats {
    time: DateTime<Utc>,
    total_messages: i64,
    parsed_messages: i64,
    failed_messages: i64,
    stored_states: i64,
    created_flights: i64,
    updated_flights: i64,
    ended_flights: i64,
    active_aircraft: i64,
    active_flights: i64,
    message_types: Vec<i64>,
    processing_time_ms: i64,
    uptime_seconds: i64,
}

/// Cold store client. Connections are pooled with r2d2; every operation
/// runs the blocking diesel call on a blocking-pool thread.
#[derive(Clone)]
pub struct ColdStore {
    pool: PgPool,
}

impl ColdStore {
    pub async fn connect(db_conn_str: &str) -> Result<Self> {
        let manager = ConnectionManager::<PgConnection>::new(db_conn_str);
        let pool = Pool::builder()
            .build(manager)
            .context("building Postgres connection pool")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("getting connection for migrations")?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("running pending migrations: {}", e))?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("migration task panicked")??;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>> {
        self.pool.get().context("getting connection from pool")
    }

    /// Load all flights with no end instant (spec §4.3.1 bootstrap).
    /// `ended_at` is modeled as nullable so this never fails on strict
    /// drivers (spec §9 Open Questions).
    pub async fn get_active_flights(&self) -> Result<Vec<Flight>> {
        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("getting connection")?;
            flights::table
                .filter(flights::ended_at.is_null())
                .select(FlightRow::as_select())
                .load::<FlightRow>(&mut conn)
                .context("loading active flights")
        })
        .await
        .context("get_active_flights task panicked")??;
        Ok(rows.into_iter().map(Flight::from).collect())
    }

    pub async fn create_flight(&self, flight: &Flight) -> Result<()> {
        let row = FlightRow::from(flight);
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("getting connection")?;
            diesel::insert_into(flights::table)
                .values(&row)
                .execute(&mut conn)
                .context("inserting flight")
        })
        .await
        .context("create_flight task panicked")??;
        Ok(())
    }

    pub async fn update_flight(&self, flight: &Flight) -> Result<()> {
        let row = FlightRow::from(flight);
        let session_id = flight.session_id.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("getting connection")?;
            diesel::update(flights::table.filter(flights::session_id.eq(&session_id)))
                .set(&row)
                .execute(&mut conn)
                .context("updating flight")
        })
        .await
        .context("update_flight task panicked")??;
        Ok(())
    }

    /// Insert one row per message (spec §4.3.2 step 6).
    pub async fn store_state(&self, state: &AircraftState) -> Result<()> {
        let row = NewAircraftState::from(state);
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("getting connection")?;
            diesel::insert_into(aircraft_states::table)
                .values(&row)
                .execute(&mut conn)
                .context("inserting aircraft state")
        })
        .await
        .context("store_state task panicked")??;
        Ok(())
    }

    /// Serialize a statistics snapshot row (spec §4.3.4).
    pub async fn write_stats(&self, snapshot: &StatsSnapshot) -> Result<()> {
        let row = NewSystemStats {
            time: snapshot.time,
            total_messages: snapshot.total_messages,
            parsed_messages: snapshot.parsed_messages,
            failed_messages: snapshot.failed_messages,
            stored_states: snapshot.stored_states,
            created_flights: snapshot.created_flights,
            updated_flights: snapshot.updated_flights,
            ended_flights: snapshot.ended_flights,
            active_aircraft: snapshot.active_aircraft,
            active_flights: snapshot.active_flights,
            message_types: snapshot.message_types.to_vec(),
            processing_time_ms: snapshot.processing_time_ms,
            uptime_seconds: snapshot.uptime_seconds,
        };
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("getting connection")?;
            diesel::insert_into(system_stats::table)
                .values(&row)
                .execute(&mut conn)
                .context("inserting system stats snapshot")
        })
        .await
        .context("write_stats task panicked")??;
        Ok(())
    }

    /// Close the cold store (second in the shutdown order of spec §5 —
    /// flush, then the pool is dropped with `self`).
    pub async fn close(self) -> Result<()> {
        Ok(())
    }
}
