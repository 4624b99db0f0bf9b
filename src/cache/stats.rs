//! Cache Statistics Module
//!
//! Tracks cache counters and the size snapshot returned by `stats()`.

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of cache contents and counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently in the memory tier
    pub count: usize,
    /// Best-effort serialized size of the memory tier
    pub approx_bytes: usize,
    /// Smallest `created_at` in the memory tier
    pub oldest_created_at: Option<u64>,
    /// Largest `created_at` in the memory tier
    pub newest_created_at: Option<u64>,
    /// Reads that returned a value
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Entries removed by the size cap
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }
}
