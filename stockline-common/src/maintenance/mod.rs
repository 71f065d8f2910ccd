//! Background maintenance loop.
//!
//! A single periodic task (default hourly) that drops expired in-process
//! entries, reaps the persistent freshness ledger and expired FX rows, and
//! logs an aggregate health line. Errors are logged and the loop continues;
//! it never blocks reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::storage::StorageBackend;

/// Owns the loop's dependencies; consumed by [`MaintenanceLoop::spawn`] so
/// at most one instance of the task can exist per loop value.
pub struct MaintenanceLoop {
    cache: Arc<CacheManager>,
    storage: Arc<dyn StorageBackend>,
    interval: Duration,
}

/// Handle for stopping the spawned loop.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl MaintenanceLoop {
    pub fn new(
        cache: Arc<CacheManager>,
        storage: Arc<dyn StorageBackend>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            storage,
            interval,
        }
    }

    /// Start the background task.
    pub fn spawn(self) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Consume the immediate first tick; the first cycle runs after
            // one full interval
            ticker.tick().await;

            info!(
                "maintenance loop started, interval {}s",
                self.interval.as_secs()
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_cycle().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("maintenance loop stopping");
                            break;
                        }
                    }
                }
            }
        });

        MaintenanceHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    /// One maintenance cycle. Public so tests and CLI commands can run a
    /// cycle on demand.
    pub async fn run_cycle(&self) {
        let purged = self.cache.purge_expired();

        let reaped = match self.storage.reap_expired_cache().await {
            Ok(count) => count,
            Err(e) => {
                warn!("ledger reap failed: {}", e);
                0
            }
        };
        let fx_reaped = match self.storage.reap_expired_fx_rates().await {
            Ok(count) => count,
            Err(e) => {
                warn!("fx reap failed: {}", e);
                0
            }
        };

        let stats = self.cache.stats();
        let health = self.storage.health_snapshot().await;
        info!(
            "maintenance cycle: purged {} memory entries, reaped {} ledger rows, {} fx rows; \
             cache hit rate {:.2}, {} entries; store healthy={} ({} symbols, {} bars)",
            purged,
            reaped,
            fx_reaped,
            stats.hit_rate,
            stats.entries,
            health.healthy,
            health.stats.symbols,
            health.stats.bars,
        );
    }
}
