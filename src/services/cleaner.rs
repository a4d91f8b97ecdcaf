//! Stale series cleanup service
//!
//! Walks the write ledger on a fixed cadence and purges series that have
//! gone without writes. Each cycle runs idle → scanning → purging → idle:
//! the scan asks the ledger for every key written before `now − 60 s`, the
//! purge issues one open-ended deletion per key through the series store.
//! Per-key failures are logged and isolated; a key whose deletion failed
//! keeps its ledger row and reappears in the next scan. Missed ticks are
//! skipped, so a slow purge never overlaps the next cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::command;
use crate::ledger::WriteLedger;
use crate::store::SeriesStore;

use super::framework::{Service, ServiceError, ServiceStatus};

/// Cadence of the cleanup cycle (minute cron equivalent)
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Age beyond which a series counts as stale
pub const STALE_AFTER_MS: i64 = 60_000;

/// Configuration for the cleanup service
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Interval between cycles
    ///
    /// The production cadence is one minute; tests shorten it.
    pub interval: Duration,

    /// Staleness threshold subtracted from the scan time
    pub stale_after_ms: i64,

    /// Enable the cleanup cycle
    pub enabled: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval: CLEANUP_INTERVAL,
            stale_after_ms: STALE_AFTER_MS,
            enabled: true,
        }
    }
}

/// Phase of the cleanup cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanerPhase {
    /// Waiting for the next tick
    Idle,
    /// Reading stale keys from the ledger
    Scanning,
    /// Issuing store-level deletions
    Purging,
}

/// Counters collected by the cleanup service
#[derive(Debug, Default, Clone)]
pub struct CleanerStats {
    /// Completed cycles
    pub cycles: u64,

    /// Keys found stale across all scans
    pub keys_scanned: u64,

    /// Successful store-level deletions
    pub keys_purged: u64,

    /// Deletions the store rejected
    pub purge_failures: u64,
}

/// Background service purging stale series
pub struct CleanerService {
    config: CleanerConfig,
    store: Arc<dyn SeriesStore>,
    ledger: Arc<WriteLedger>,
    status: RwLock<ServiceStatus>,
    phase: RwLock<CleanerPhase>,
    stats: RwLock<CleanerStats>,
}

impl CleanerService {
    /// Create a new cleanup service
    pub fn new(
        config: CleanerConfig,
        store: Arc<dyn SeriesStore>,
        ledger: Arc<WriteLedger>,
    ) -> Self {
        Self {
            config,
            store,
            ledger,
            status: RwLock::new(ServiceStatus::Stopped),
            phase: RwLock::new(CleanerPhase::Idle),
            stats: RwLock::new(CleanerStats::default()),
        }
    }

    /// Create with the default one-minute cadence
    pub fn with_defaults(store: Arc<dyn SeriesStore>, ledger: Arc<WriteLedger>) -> Self {
        Self::new(CleanerConfig::default(), store, ledger)
    }

    /// Current cycle phase
    pub fn phase(&self) -> CleanerPhase {
        *self.phase.read()
    }

    /// Get current counters
    pub fn stats(&self) -> CleanerStats {
        self.stats.read().clone()
    }

    /// Run one full cleanup cycle
    ///
    /// Public so a scheduler-driven deployment can trigger cycles itself
    /// instead of running the service loop.
    pub async fn run_cycle(&self) {
        if !self.config.enabled {
            return;
        }

        *self.phase.write() = CleanerPhase::Scanning;
        let threshold = Utc::now().timestamp_millis() - self.config.stale_after_ms;

        let stale = match self.ledger.stale_keys(threshold) {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "stale key scan failed");
                *self.phase.write() = CleanerPhase::Idle;
                return;
            },
        };

        if !stale.is_empty() {
            debug!(count = stale.len(), threshold, "purging stale series");
            *self.phase.write() = CleanerPhase::Purging;
        }

        let mut purged = 0u64;
        let mut failed = 0u64;
        for key in &stale {
            // Each key is attempted independently; one failure never
            // aborts the rest of the batch.
            let cmd = command::build_delete(key, None, None);
            match self.store.execute(&cmd.render()).await {
                Ok(_) => {
                    purged += 1;
                    // Drop the ledger row so the purged key stops showing
                    // up as stale in every future scan. A failure here
                    // just means one more no-op deletion next cycle.
                    if let Err(e) = self.ledger.forget(key) {
                        warn!(key = %key, error = %e, "could not drop ledger row after purge");
                    }
                },
                Err(e) => {
                    failed += 1;
                    warn!(key = %key, error = %e, "stale series deletion failed");
                },
            }
        }

        {
            let mut stats = self.stats.write();
            stats.cycles += 1;
            stats.keys_scanned += stale.len() as u64;
            stats.keys_purged += purged;
            stats.purge_failures += failed;
        }

        *self.phase.write() = CleanerPhase::Idle;
    }
}

#[async_trait::async_trait]
impl Service for CleanerService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        debug!(
            interval_s = self.config.interval.as_secs(),
            stale_after_ms = self.config.stale_after_ms,
            "cleanup service started"
        );

        let mut tick = interval(self.config.interval);
        // A cycle still running when the next tick fires must not stack a
        // second cycle behind it.
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; consume it
        // so cycles start one cadence after startup.
        tick.tick().await;

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("cleanup service received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "cleanup service broadcast receiver lagged");
                        }
                    }
                }

                _ = tick.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        debug!("cleanup service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ledger_cleaner"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
