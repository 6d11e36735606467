//! Periodic eviction for the in-memory claims cache.
//!
//! Expired entries already read as absent; this task only bounds memory for
//! tokens that are never presented again.
//!
//! # Graceful Shutdown
//!
//! Exits when the cancellation token is cancelled.

use crate::cache::InMemoryClaimsCache;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default purge interval in seconds.
pub const DEFAULT_PURGE_INTERVAL_SECONDS: u64 = 60;

/// Run the purge loop until `cancel_token` is cancelled.
pub async fn start_cache_purge(
    cache: InMemoryClaimsCache,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(interval);

    info!(target: "flex.tasks.cache_purge", "Cache purge task started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    debug!(target: "flex.tasks.cache_purge", removed, "Evicted expired claims");
                }
            }
            _ = cancel_token.cancelled() => {
                info!(target: "flex.tasks.cache_purge", "Cache purge task received shutdown signal, exiting");
                break;
            }
        }
    }
}
