//! Cache Metrics Collection
//!
//! Per-tier counters and point-in-time snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-tier read counters
#[derive(Debug, Default)]
pub struct TierMetrics {
    gets: AtomicU64,
    hits: AtomicU64,
}

impl TierMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Snapshot of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Tracked bytes in use
    pub bytes: u64,
    /// Allotted bytes
    pub max_bytes: u64,
    /// Number of entries
    pub items: u64,
    /// Lookups against this tier
    pub gets: u64,
    /// Lookups satisfied by this tier
    pub hits: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }

    /// Utilization (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.bytes as f64 / self.max_bytes as f64
        }
    }
}
