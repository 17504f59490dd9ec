//! Group Statistics
//!
//! Every resolution path of a group is counted independently. The counters
//! feed `/stats` and `/metrics`; nothing in the fill path reads them.
//!
//! Entries leaving either tier are counted through the group's eviction
//! listener, split by [`EvictionReason`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::{CacheStats, EvictionListener, EvictionReason, Value};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Live counters of one group
#[derive(Debug, Default)]
pub struct GroupStats {
    /// Every get, including ones answered from cache
    pub gets: Counter,
    /// Gets answered by either tier
    pub cache_hits: Counter,
    /// Successful remote fetches
    pub peer_loads: Counter,
    /// Failed remote fetches
    pub peer_errors: Counter,
    /// Gets that missed the cache (before coalescing)
    pub loads: Counter,
    /// Successful local loader calls
    pub local_loads: Counter,
    /// Failed local loader calls, not-found included
    pub local_load_errors: Counter,
    /// Requests received from peers
    pub server_requests: Counter,
    /// Gets answered from the negative cache
    pub negative_hits: Counter,
    /// Entries dropped from either tier for capacity
    pub evictions: Counter,
    /// Entries deleted from a tier, moves between tiers included
    pub removals: Counter,
    /// Entries found expired on read
    pub expirations: Counter,
}

impl GroupStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionListener for GroupStats {
    fn on_evict(&self, _key: &str, _value: &Value, reason: EvictionReason) {
        match reason {
            EvictionReason::Evicted => self.evictions.inc(),
            EvictionReason::Removed => self.removals.inc(),
            EvictionReason::Expired => self.expirations.inc(),
        }
    }
}

/// Point-in-time view of a group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupStatsSnapshot {
    pub name: String,
    pub gets: u64,
    pub cache_hits: u64,
    pub peer_loads: u64,
    pub peer_errors: u64,
    pub loads: u64,
    /// Fills actually executed after coalescing
    pub loads_deduped: u64,
    /// Callers that joined an in-flight fill
    pub coalesced_waits: u64,
    pub local_loads: u64,
    pub local_load_errors: u64,
    pub server_requests: u64,
    pub negative_hits: u64,
    pub evictions: u64,
    pub removals: u64,
    pub expirations: u64,
    pub main: CacheStats,
    pub hot: CacheStats,
}

impl GroupStatsSnapshot {
    /// Fraction of gets answered from cache
    pub fn hit_ratio(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.gets as f64
        }
    }
}
