use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for observing cache behavior. Enabled via
/// `Config::metrics`; all updates are relaxed, so a snapshot is a consistent
/// set of independently-read values, not a transaction.
#[derive(Default)]
pub struct Metrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub keys_added: AtomicU64,
    pub keys_updated: AtomicU64,
    pub keys_evicted: AtomicU64,
    pub cost_added: AtomicU64,
    pub cost_evicted: AtomicU64,
    pub sets_dropped: AtomicU64,
    pub sets_rejected: AtomicU64,
    pub gets_dropped: AtomicU64,
    pub gets_kept: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys_added: self.keys_added.load(Ordering::Relaxed),
            keys_updated: self.keys_updated.load(Ordering::Relaxed),
            keys_evicted: self.keys_evicted.load(Ordering::Relaxed),
            cost_added: self.cost_added.load(Ordering::Relaxed),
            cost_evicted: self.cost_evicted.load(Ordering::Relaxed),
            sets_dropped: self.sets_dropped.load(Ordering::Relaxed),
            sets_rejected: self.sets_rejected.load(Ordering::Relaxed),
            gets_dropped: self.gets_dropped.load(Ordering::Relaxed),
            gets_kept: self.gets_kept.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count(counter: &AtomicU64, delta: u64) {
        counter.fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn clear(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.keys_added,
            &self.keys_updated,
            &self.keys_evicted,
            &self.cost_added,
            &self.cost_evicted,
            &self.sets_dropped,
            &self.sets_rejected,
            &self.gets_dropped,
            &self.gets_kept,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of the counters, serializable for telemetry export.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub keys_added: u64,
    pub keys_updated: u64,
    pub keys_evicted: u64,
    pub cost_added: u64,
    pub cost_evicted: u64,
    pub sets_dropped: u64,
    pub sets_rejected: u64,
    pub gets_dropped: u64,
    pub gets_kept: u64,
}

impl MetricsSnapshot {
    /// Hit ratio over all lookups so far, 0.0 when none happened.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
