//! Statistics aggregator: lock-free atomic counters for the hot path, a
//! periodic cold-store snapshot, and a final snapshot on shutdown. See
//! spec §4.3.4, §5.

use crate::store::{ColdStore, StatsSnapshot};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MESSAGE_TYPE_SLOTS: usize = 10;

/// Per-process statistics. Hot-path counters are atomics to avoid lock
/// contention; the two non-atomic fields share a short `RwLock` per spec
/// §5.
pub struct Stats {
    total_messages: AtomicU64,
    parsed_messages: AtomicU64,
    failed_messages: AtomicU64,
    stored_states: AtomicU64,
    created_flights: AtomicU64,
    updated_flights: AtomicU64,
    ended_flights: AtomicU64,
    active_aircraft: AtomicI64,
    active_flights: AtomicI64,
    message_types: [AtomicU64; MESSAGE_TYPE_SLOTS],
    processing_time_ms: AtomicU64,
    timing: RwLock<Timing>,
    process_start: Instant,
}

struct Timing {
    last_message_at: Option<chrono::DateTime<Utc>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_messages: AtomicU64::new(0),
            parsed_messages: AtomicU64::new(0),
            failed_messages: AtomicU64::new(0),
            stored_states: AtomicU64::new(0),
            created_flights: AtomicU64::new(0),
            updated_flights: AtomicU64::new(0),
            ended_flights: AtomicU64::new(0),
            active_aircraft: AtomicI64::new(0),
            active_flights: AtomicI64::new(0),
            message_types: Default::default(),
            processing_time_ms: AtomicU64::new(0),
            timing: RwLock::new(Timing { last_message_at: None }),
            process_start: Instant::now(),
        }
    }
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_total(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parsed(&self, msg_type: u8) {
        self.parsed_messages.fetch_add(1, Ordering::Relaxed);
        if (1..=9).contains(&msg_type) {
            self.message_types[(msg_type - 1) as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stored(&self) {
        self.stored_states.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flight_created(&self) {
        self.created_flights.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flight_updated(&self) {
        self.updated_flights.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flight_ended(&self) {
        self.ended_flights.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_aircraft(&self, n: i64) {
        self.active_aircraft.store(n, Ordering::Relaxed);
    }

    pub fn set_active_flights(&self, n: i64) {
        self.active_flights.store(n, Ordering::Relaxed);
    }

    pub fn add_processing_time(&self, elapsed: Duration) {
        self.processing_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub async fn touch_last_message(&self, at: chrono::DateTime<Utc>) {
        self.timing.write().await.last_message_at = Some(at);
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let mut message_types = [0i64; MESSAGE_TYPE_SLOTS];
        for (i, slot) in self.message_types.iter().enumerate() {
            message_types[i] = slot.load(Ordering::Relaxed) as i64;
        }
        StatsSnapshot {
            time: Utc::now(),
            total_messages: self.total_messages.load(Ordering::Relaxed) as i64,
            parsed_messages: self.parsed_messages.load(Ordering::Relaxed) as i64,
            failed_messages: self.failed_messages.load(Ordering::Relaxed) as i64,
            stored_states: self.stored_states.load(Ordering::Relaxed) as i64,
            created_flights: self.created_flights.load(Ordering::Relaxed) as i64,
            updated_flights: self.updated_flights.load(Ordering::Relaxed) as i64,
            ended_flights: self.ended_flights.load(Ordering::Relaxed) as i64,
            active_aircraft: self.active_aircraft.load(Ordering::Relaxed),
            active_flights: self.active_flights.load(Ordering::Relaxed),
            message_types,
            processing_time_ms: self.processing_time_ms.load(Ordering::Relaxed) as i64,
            uptime_seconds: self.process_start.elapsed().as_secs() as i64,
        }
    }
}

/// Spawn the periodic snapshot task: every 5 minutes, serialize a snapshot
/// row to `system_stats`. Returns a handle whose completion indicates the
/// final snapshot (written on cancellation) has been persisted.
pub fn spawn_snapshot_task(
    stats: Arc<Stats>,
    store: ColdStore,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("writing final statistics snapshot");
                    let snapshot = stats.snapshot().await;
                    if let Err(e) = store.write_stats(&snapshot).await {
                        error!("failed to write final stats snapshot: {}", e);
                    }
                    return;
                }
                _ = tokio::time::sleep(SNAPSHOT_INTERVAL) => {
                    let snapshot = stats.snapshot().await;
                    if let Err(e) = store.write_stats(&snapshot).await {
                        error!("failed to write periodic stats snapshot: {}", e);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn message_type_counts_land_in_the_right_slot() {
        let stats = Stats::new();
        stats.record_parsed(8);
        stats.record_parsed(8);
        stats.record_parsed(3);
        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.message_types[7], 2);
        assert_eq!(snapshot.message_types[2], 1);
        assert_eq!(snapshot.parsed_messages, 3);
    }
}
