//! Observability counters for the Top-N operator.
//!
//! Counters never influence ranking; they only describe cache behaviour
//! and input quality.

use crate::cache::PartitionCache;

/// Counters owned by the operator itself.
#[derive(Debug, Clone, Default)]
pub struct TopNCounters {
    /// Rows processed.
    pub requests: u64,
    /// Rows whose variable rank end disagreed with the persisted one.
    pub invalid_rank_ends: u64,
}

impl TopNCounters {
    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time view of operator and cache metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct TopNMetrics {
    /// Rows processed.
    pub requests: u64,
    /// Buffer lookups answered from the cache.
    pub cache_hits: u64,
    /// Cache hit rate (0.0–1.0).
    pub cache_hit_rate: f64,
    /// Partitions currently cached.
    pub cached_partitions: usize,
    /// Maximum number of cached partitions.
    pub cache_capacity: usize,
    /// Partitions evicted for capacity.
    pub cache_evictions: u64,
    /// Partitions dropped because their TTL elapsed.
    pub cache_expirations: u64,
    /// Rows whose variable rank end was ignored.
    pub invalid_rank_ends: u64,
}

/// Collect metrics from the operator counters and its cache.
#[must_use]
pub fn collect_metrics<V>(counters: &TopNCounters, cache: &PartitionCache<V>) -> TopNMetrics {
    TopNMetrics {
        requests: counters.requests,
        cache_hits: cache.total_hits(),
        cache_hit_rate: cache.hit_rate(),
        cached_partitions: cache.len(),
        cache_capacity: cache.max_entries(),
        cache_evictions: cache.total_evictions(),
        cache_expirations: cache.total_expirations(),
        invalid_rank_ends: counters.invalid_rank_ends,
    }
}
