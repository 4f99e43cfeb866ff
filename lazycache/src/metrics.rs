//! Cache activity counters.
//!
//! Background renewals never report failures to a caller, so these counters
//! (together with `tracing` events) are how a stuck renewal loop gets noticed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every wrapped function of one [`LazyCache`](crate::LazyCache).
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Calls answered from a fresh record
    pub fresh_hits: AtomicU64,
    /// Calls answered from a stale record
    pub stale_hits: AtomicU64,
    /// Calls that found no record and computed (or waited for) a first value
    pub cold_loads: AtomicU64,
    /// Cold calls that attached to a computation another caller started
    pub coalesced_waits: AtomicU64,
    /// Background renewals started
    pub renewals_started: AtomicU64,
    /// Background renewals that replaced the record
    pub renewals_succeeded: AtomicU64,
    /// Background renewals that failed (previous record kept)
    pub renewals_failed: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            cold_loads: self.cold_loads.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            renewals_started: self.renewals_started.load(Ordering::Relaxed),
            renewals_succeeded: self.renewals_succeeded.load(Ordering::Relaxed),
            renewals_failed: self.renewals_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub cold_loads: u64,
    pub coalesced_waits: u64,
    pub renewals_started: u64,
    pub renewals_succeeded: u64,
    pub renewals_failed: u64,
}

impl CacheMetricsSnapshot {
    /// Renewals started but not yet finished.
    pub fn renewals_pending(&self) -> u64 {
        self.renewals_started
            .saturating_sub(self.renewals_succeeded + self.renewals_failed)
    }
}
