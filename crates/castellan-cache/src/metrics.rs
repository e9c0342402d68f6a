//! Cache client metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global cache metrics instance.
pub static CACHE_METRICS: CacheMetrics = CacheMetrics::new();

/// Counters for attribute cache traffic.
#[derive(Debug)]
pub struct CacheMetrics {
    pub(crate) hits_total: AtomicU64,
    pub(crate) misses_total: AtomicU64,
    /// Store unavailable or timed out.
    pub(crate) store_failures_total: AtomicU64,
    pub(crate) refreshes_total: AtomicU64,
    pub(crate) refresh_failures_total: AtomicU64,
    /// Entries removed by invalidation.
    pub(crate) invalidations_total: AtomicU64,
}

impl CacheMetrics {
    pub const fn new() -> Self {
        Self {
            hits_total: AtomicU64::new(0),
            misses_total: AtomicU64::new(0),
            store_failures_total: AtomicU64::new(0),
            refreshes_total: AtomicU64::new(0),
            refresh_failures_total: AtomicU64::new(0),
            invalidations_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Exports all counters in Prometheus exposition format.
    pub fn export_prometheus(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        for (name, help, counter) in [
            ("castellan_cache_hits_total", "Attribute cache hits", &self.hits_total),
            ("castellan_cache_misses_total", "Attribute cache misses", &self.misses_total),
            (
                "castellan_cache_store_failures_total",
                "Cache store operations that failed or timed out",
                &self.store_failures_total,
            ),
            (
                "castellan_cache_refreshes_total",
                "Attribute sets recomputed from the source of record",
                &self.refreshes_total,
            ),
            (
                "castellan_cache_refresh_failures_total",
                "Attribute set recomputations that failed",
                &self.refresh_failures_total,
            ),
            (
                "castellan_cache_invalidations_total",
                "Cache entries removed by invalidation",
                &self.invalidations_total,
            ),
        ] {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {}", counter.load(Ordering::Relaxed));
        }
        output
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits_total: self.hits_total.load(Ordering::Relaxed),
            misses_total: self.misses_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            refresh_failures_total: self.refresh_failures_total.load(Ordering::Relaxed),
            invalidations_total: self.invalidations_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits_total: u64,
    pub misses_total: u64,
    pub store_failures_total: u64,
    pub refreshes_total: u64,
    pub refresh_failures_total: u64,
    pub invalidations_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_lists_every_counter() {
        let metrics = CacheMetrics::new();
        CacheMetrics::incr(&metrics.hits_total);
        CacheMetrics::add(&metrics.invalidations_total, 3);

        let text = metrics.export_prometheus();
        assert!(text.contains("castellan_cache_hits_total 1"));
        assert!(text.contains("castellan_cache_invalidations_total 3"));
        assert!(text.contains("castellan_cache_misses_total 0"));
        assert_eq!(metrics.snapshot().invalidations_total, 3);
    }
}
