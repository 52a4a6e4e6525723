//! Background sweep removing stalled partial events.

use std::sync::Arc;

use log::warn;
use tokio::{
    select,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use super::ChunkCache;

/// Spawn a task that purges expired entries from `cache` every `period`
/// until `shutdown` is cancelled.
///
/// The sweep is independent of connection state: partial events stranded by
/// a dropped connection are collected like any other.
#[must_use]
pub fn spawn_eviction(
    cache: Arc<ChunkCache>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be stale yet.
        ticker.tick().await;

        loop {
            select! {
                biased;

                () = shutdown.cancelled() => break,
                _ = ticker.tick() => sweep(&cache),
            }
        }
    })
}

fn sweep(cache: &ChunkCache) {
    for expired in cache.purge_expired() {
        crate::metrics::inc_reassembly_expired();
        warn!(
            "reassembly expired: message_id={}, trace_id={}, parts={}/{}",
            expired.message_id, expired.trace_id, expired.received_parts, expired.total_parts
        );
    }
}
