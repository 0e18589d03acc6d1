//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use serde::Serialize;

// == Cache Stats ==
/// Process-lifetime counters. Reset only through an explicit operator call.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (absent, expired or self-healed)
    pub misses: u64,
    /// Number of completed writes
    pub sets: u64,
    /// Number of entries removed by delete
    pub deletes: u64,
    /// Number of entries evicted due to LRU policy
    pub evictions: u64,
    /// Number of `get` calls
    pub total_accesses: u64,
    /// Number of entries removed by their expiration timer or the sweep
    pub total_expired: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
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

    pub fn record_access(&mut self) {
        self.total_accesses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_delete(&mut self) {
        self.deletes += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.total_expired += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // == Snapshot ==
    /// Freezes the counters together with the current entry count.
    pub fn snapshot(&self, size: usize) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            evictions: self.evictions,
            total_accesses: self.total_accesses,
            total_expired: self.total_expired,
            size,
            hit_rate: self.hit_rate(),
        }
    }
}

// == Stats Snapshot ==
/// Point-in-time statistics returned by `CacheEngine::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub total_accesses: u64,
    pub total_expired: u64,
    /// Current number of entries
    pub size: usize,
    /// hits / (hits + misses), 0 when both are 0
    pub hit_rate: f64,
}
