//! Cache Statistics Module
//!
//! Per-provider hit/miss counters and the snapshot returned by `stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Hit Counters ==
/// Increment-only hit/miss counters owned by one provider instance.
///
/// Counters live as long as the provider and are never reset by `clear`.
#[derive(Debug, Default)]
pub struct HitCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounters {
    /// Creates counters starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the hit counter.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the miss counter.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Builds a statistics snapshot with backend-computed entry data.
    pub fn snapshot(&self, entry_count: i64, size_bytes: Option<u64>) -> CacheStatistics {
        CacheStatistics {
            hit_count: self.hits(),
            miss_count: self.misses(),
            entry_count,
            size_bytes,
        }
    }
}

// == Cache Statistics ==
/// Point-in-time view of a provider's counters and contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    /// `get` calls that returned a live value
    pub hit_count: u64,
    /// `get` calls that returned nothing
    pub miss_count: u64,
    /// Live (non-expired) entries currently held
    pub entry_count: i64,
    /// Storage footprint, when the backend can report it cheaply
    pub size_bytes: Option<u64>,
}

impl CacheStatistics {
    /// Number of `get` calls observed.
    pub fn total_requests(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
