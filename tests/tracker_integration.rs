//! End-to-end tracker scenarios against a real Postgres/TimescaleDB and
//! Redis instance (spec §8 scenarios 3 and 5). Mirrors the teacher's
//! `TEST_DATABASE_URL`-gated repository tests: if no test database or
//! cache is reachable, the test logs and skips rather than failing CI.

use chrono::Utc;
use sbs_surveillance::cache::Cache;
use sbs_surveillance::model::SbsMessage;
use sbs_surveillance::stats::Stats;
use sbs_surveillance::store::ColdStore;
use sbs_surveillance::tracker::Tracker;

fn test_database_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/sbs_surveillance_test".to_string())
}

fn test_redis_addr() -> String {
    std::env::var("TEST_REDIS_ADDR").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn test_tracker() -> Option<Tracker> {
    let store = match ColdStore::connect(&test_database_url()).await {
        Ok(store) => store,
        Err(e) => {
            println!("skipping test - no test database connection: {}", e);
            return None;
        }
    };
    let cache = match Cache::connect(&test_redis_addr()).await {
        Ok(cache) => cache,
        Err(e) => {
            println!("skipping test - no test redis connection: {}", e);
            return None;
        }
    };
    let stats = Stats::new();
    match Tracker::bootstrap(cache, store, stats).await {
        Ok(tracker) => Some(tracker),
        Err(e) => {
            println!("skipping test - tracker bootstrap failed: {}", e);
            None
        }
    }
}

fn type8_raw(hex: &str, altitude: &str, speed: &str, lat: &str, lon: &str) -> String {
    // 22 comma-separated fields, type 8, matching spec §4.4's field table.
    let mut fields: Vec<String> = (0..22).map(|_| String::new()).collect();
    fields[0] = "MSG".to_string();
    fields[1] = "8".to_string();
    fields[4] = hex.to_string();
    fields[11] = altitude.to_string();
    fields[12] = speed.to_string();
    fields[14] = lat.to_string();
    fields[15] = lon.to_string();
    fields.join(",")
}

#[tokio::test]
async fn flight_creation_matches_scenario_3() {
    let Some(tracker) = test_tracker().await else {
        return;
    };

    let hex = "ABC123";
    let t0 = Utc::now();
    let raw = type8_raw(hex, "10000", "450", "40.0", "-74.0");
    let message = SbsMessage {
        raw,
        timestamp: t0,
        source: "test:30003".to_string(),
    };

    tracker
        .process_message(&message)
        .await
        .expect("processing a fresh type-8 record should succeed");
}

#[tokio::test]
async fn flight_closure_matches_scenario_5() {
    let Some(tracker) = test_tracker().await else {
        return;
    };

    let hex = "DEF456";
    let t0 = Utc::now();
    let create_raw = type8_raw(hex, "5000", "200", "41.0", "-73.0");
    tracker
        .process_message(&SbsMessage {
            raw: create_raw,
            timestamp: t0,
            source: "test:30003".to_string(),
        })
        .await
        .expect("creating the flight should succeed");

    let stale_timestamp = t0 - chrono::Duration::minutes(10);
    let stale_raw = type8_raw(hex, "5200", "210", "41.1", "-73.1");
    tracker
        .process_message(&SbsMessage {
            raw: stale_raw,
            timestamp: stale_timestamp,
            source: "test:30003".to_string(),
        })
        .await
        .expect("processing the stale-timestamped record should succeed");
}
