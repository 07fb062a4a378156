//! Cache Statistics Module
//!
//! Tracks read-path, invalidation and refresh counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// `get` calls answered by the local tier
    pub local_hits: u64,
    /// `get` calls answered by the remote tier
    pub remote_hits: u64,
    /// `get` calls that fell through to the loader and succeeded
    pub loads: u64,
    /// Loader invocations on the read path that failed
    pub load_failures: u64,
    /// Version mismatches handed to the invalidation queue
    pub invalidations_queued: u64,
    /// Notifications applied by the invalidation worker
    pub invalidations_applied: u64,
    /// Notifications dropped (queue full, remote read failed or value absent)
    pub invalidations_dropped: u64,
    /// Refreshes that bumped the version counter
    pub refreshes: u64,
    /// Refreshes that ended in an error
    pub refresh_failures: u64,
    /// Local entries evicted by the LRU policy
    pub evictions: u64,
    /// Local entries dropped after their TTL
    pub expirations: u64,
    /// Current number of local entries
    pub local_entries: usize,
}

impl CacheStats {
    // == Hit Rate ==
    /// Share of reads served without calling a loader.
    ///
    /// Returns 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.remote_hits;
        let total = hits + self.loads + self.load_failures;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by the read path and background tasks.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    invalidations_queued: AtomicU64,
    invalidations_applied: AtomicU64,
    invalidations_dropped: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl StatsRecorder {
    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation_queued(&self) {
        self.invalidations_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation_applied(&self) {
        self.invalidations_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation_dropped(&self) {
        self.invalidations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter; local tier figures are filled in by the caller.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            invalidations_queued: self.invalidations_queued.load(Ordering::Relaxed),
            invalidations_applied: self.invalidations_applied.load(Ordering::Relaxed),
            invalidations_dropped: self.invalidations_dropped.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            ..CacheStats::default()
        }
    }
}
