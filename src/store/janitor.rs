//! Background eviction for the derivative store.
//!
//! A sweep runs in two phases:
//!
//! 1. **Age**: every entry older than `cache_duration` is removed.
//! 2. **Size**: if the survivors still exceed `max_cache_size_bytes`, they are
//!    removed oldest-first (ties broken by key) until the total fits.
//!
//! Per-entry failures are logged and skipped. A sweep stops early once it has
//! deleted `max_deletions` entries or run for `time_budget`; the report is
//! then marked `truncated` and the next sweep continues the work.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::disk::{CacheIndex, EntryMeta};
use crate::derivative::CacheKey;

/// Default time between sweeps (10 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default maximum entry age (7 days).
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default total size budget (1 GiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default cap on deletions per sweep.
pub const DEFAULT_MAX_DELETIONS: usize = 10_000;

/// Default wall-clock budget per sweep.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(30);

/// Maximum number of entries inspected by one sweep.
pub const DEFAULT_MAX_SCAN_ENTRIES: usize = 1_000_000;

// =============================================================================
// Configuration
// =============================================================================

/// Eviction policy and per-sweep bounds.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Time between scheduled sweeps
    pub interval: Duration,

    /// Entries older than this are removed
    pub cache_duration: Duration,

    /// Total bytes allowed after a sweep
    pub max_cache_size_bytes: u64,

    /// Maximum deletions per sweep
    pub max_deletions: usize,

    /// Maximum wall-clock time spent deleting per sweep
    pub time_budget: Duration,

    /// Maximum entries inspected per sweep
    pub max_scan_entries: usize,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            cache_duration: DEFAULT_CACHE_DURATION,
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE,
            max_deletions: DEFAULT_MAX_DELETIONS,
            time_budget: DEFAULT_TIME_BUDGET,
            max_scan_entries: DEFAULT_MAX_SCAN_ENTRIES,
        }
    }
}

// =============================================================================
// Sweep Report
// =============================================================================

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries inspected
    pub scanned: usize,

    /// Entries removed for exceeding the maximum age
    pub removed_expired: usize,

    /// Entries removed to get under the size budget
    pub removed_for_size: usize,

    /// Deletions that failed and were skipped
    pub failed: usize,

    /// Entries left after the sweep
    pub remaining_entries: usize,

    /// Bytes left after the sweep
    pub remaining_bytes: u64,

    /// The sweep stopped early (budget exhausted, scan limit hit, scan
    /// failure, or another sweep already running)
    pub truncated: bool,
}

impl SweepReport {
    /// Total number of entries removed.
    pub fn removed_count(&self) -> usize {
        self.removed_expired + self.removed_for_size
    }
}

// =============================================================================
// CacheJanitor
// =============================================================================

/// Enforces the age and size policy over a [`CacheIndex`].
pub struct CacheJanitor<I: CacheIndex> {
    index: Arc<I>,
    config: JanitorConfig,
    sweeping: Mutex<()>,
}

/// Handle to a janitor running on a background task.
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop the background task and wait for it to finish.
    ///
    /// A sweep in progress is allowed to complete first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Janitor task ended abnormally");
        }
    }
}

impl<I: CacheIndex + 'static> CacheJanitor<I> {
    pub fn new(index: Arc<I>, config: JanitorConfig) -> Self {
        Self {
            index,
            config,
            sweeping: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &JanitorConfig {
        &self.config
    }

    /// Run one sweep, judging entry age relative to `now`.
    pub async fn sweep(&self, now: SystemTime) -> SweepReport {
        let Ok(_guard) = self.sweeping.try_lock() else {
            debug!("Sweep already in progress, skipping");
            return SweepReport {
                truncated: true,
                ..SweepReport::default()
            };
        };

        let started = Instant::now();
        let mut report = SweepReport::default();

        let entries = match self.index.scan(self.config.max_scan_entries).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cache scan failed, skipping sweep");
                report.truncated = true;
                return report;
            }
        };
        report.scanned = entries.len();
        if entries.len() >= self.config.max_scan_entries {
            report.truncated = true;
        }

        // Phase 1: age eviction
        let mut survivors: Vec<EntryMeta> = Vec::with_capacity(entries.len());
        let mut failed_keys: HashSet<CacheKey> = HashSet::new();
        for entry in entries {
            let age = now.duration_since(entry.modified_at).unwrap_or_default();
            if age <= self.config.cache_duration {
                survivors.push(entry);
                continue;
            }

            if self.budget_exhausted(&report, started) {
                report.truncated = true;
                survivors.push(entry);
                continue;
            }

            match self.index.remove(&entry.key).await {
                Ok(()) => report.removed_expired += 1,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Failed to remove expired entry");
                    report.failed += 1;
                    failed_keys.insert(entry.key.clone());
                    survivors.push(entry);
                }
            }
        }

        // Phase 2: size eviction, oldest first
        let mut total: u64 = survivors.iter().map(|e| e.size_bytes).sum();
        let mut remaining_entries = survivors.len();

        if total > self.config.max_cache_size_bytes {
            survivors.sort_by(|a, b| {
                a.modified_at
                    .cmp(&b.modified_at)
                    .then_with(|| a.key.cmp(&b.key))
            });

            // Entries that already failed once this sweep still count toward
            // the total but are not retried
            for entry in survivors.iter().filter(|e| !failed_keys.contains(&e.key)) {
                if total <= self.config.max_cache_size_bytes {
                    break;
                }
                if self.budget_exhausted(&report, started) {
                    report.truncated = true;
                    break;
                }

                match self.index.remove(&entry.key).await {
                    Ok(()) => {
                        report.removed_for_size += 1;
                        total = total.saturating_sub(entry.size_bytes);
                        remaining_entries -= 1;
                    }
                    Err(e) => {
                        warn!(key = %entry.key, error = %e, "Failed to evict entry");
                        report.failed += 1;
                    }
                }
            }
        }

        report.remaining_entries = remaining_entries;
        report.remaining_bytes = total;

        if report.removed_count() > 0 || report.failed > 0 {
            info!(
                removed_expired = report.removed_expired,
                removed_for_size = report.removed_for_size,
                failed = report.failed,
                remaining_entries = report.remaining_entries,
                remaining_bytes = report.remaining_bytes,
                truncated = report.truncated,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Cache sweep finished"
            );
        } else {
            debug!(
                scanned = report.scanned,
                remaining_bytes = report.remaining_bytes,
                "Cache sweep found nothing to remove"
            );
        }

        report
    }

    fn budget_exhausted(&self, report: &SweepReport, started: Instant) -> bool {
        report.removed_count() + report.failed >= self.config.max_deletions
            || started.elapsed() >= self.config.time_budget
    }

    /// Run sweeps on a background task every `config.interval`.
    ///
    /// The first sweep runs immediately. Must be called within a tokio runtime.
    pub fn spawn(self: Arc<Self>) -> JanitorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(SystemTime::now()).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Janitor stopping");
                            break;
                        }
                    }
                }
            }
        });

        JanitorHandle { shutdown, task }
    }
}

// =============================================================================
// Tests
// =============================================================================
