//! Two-Tier Cache
//!
//! Main tier for keys this process owns, hot tier for remotely owned keys
//! read locally. Each tier evicts against its own allotment; after every
//! insert the pair is also balanced so the combined usage stays within the
//! shared budget, taking victims from the hot tier whenever it holds more
//! than its share of the main tier's usage.

use std::sync::Arc;

use parking_lot::Mutex;

use super::entry::Value;
use super::lru::{EvictionListener, LruCache};
use super::metrics::{CacheStats, TierMetrics};
use super::policy::TierPolicy;

/// Cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Keys owned by this process
    Main,
    /// Keys owned by a remote peer
    Hot,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Main => write!(f, "main"),
            Tier::Hot => write!(f, "hot"),
        }
    }
}

/// Main + hot cache pair sharing one byte budget
pub struct TieredCache {
    policy: TierPolicy,
    main: Mutex<LruCache>,
    hot: Mutex<LruCache>,
    main_metrics: TierMetrics,
    hot_metrics: TierMetrics,
}

impl TieredCache {
    /// Create a two-tier cache with the given budget split
    pub fn new(policy: TierPolicy) -> Self {
        Self::with_listeners(policy, Vec::new())
    }

    /// Create a two-tier cache whose tiers both report to `listeners`
    pub fn with_listeners(
        policy: TierPolicy,
        listeners: Vec<Arc<dyn EvictionListener>>,
    ) -> Self {
        Self {
            main: Mutex::new(LruCache::with_listeners(policy.main_bytes(), listeners.clone())),
            hot: Mutex::new(LruCache::with_listeners(policy.hot_bytes(), listeners)),
            policy,
            main_metrics: TierMetrics::new(),
            hot_metrics: TierMetrics::new(),
        }
    }

    /// Look up `key`, main tier first, reporting which tier answered
    pub fn get(&self, key: &str) -> Option<(Value, Tier)> {
        if self.policy.cache_bytes == 0 {
            return None;
        }

        if let Some(value) = self.main.lock().get(key) {
            self.main_metrics.record_hit();
            return Some((value, Tier::Main));
        }
        self.main_metrics.record_miss();

        if let Some(value) = self.hot.lock().get(key) {
            self.hot_metrics.record_hit();
            return Some((value, Tier::Hot));
        }
        self.hot_metrics.record_miss();

        None
    }

    /// Look up `key` without recording tier metrics or touching recency
    pub fn peek(&self, key: &str) -> Option<(Value, Tier)> {
        if self.policy.cache_bytes == 0 {
            return None;
        }

        if let Some(value) = self.main.lock().peek(key) {
            return Some((value.clone(), Tier::Main));
        }
        let hot = self.hot.lock();
        hot.peek(key).map(|value| (value.clone(), Tier::Hot))
    }

    /// Store `key` in `tier`, moving it out of the other tier.
    ///
    /// Returns `false` if the value was not cached (zero budget or the entry
    /// is larger than the tier's allotment).
    pub fn add(&self, key: &str, value: Value, tier: Tier) -> bool {
        if self.policy.cache_bytes == 0 {
            return false;
        }

        // Lock order: main, then hot
        let mut main = self.main.lock();
        let mut hot = self.hot.lock();

        let (target, other) = match tier {
            Tier::Main => (&mut *main, &mut *hot),
            Tier::Hot => (&mut *hot, &mut *main),
        };
        other.remove(key);
        let stored = target.add(key.to_string(), value);

        self.balance(&mut main, &mut hot);
        stored
    }

    /// Remove `key` from both tiers
    pub fn remove(&self, key: &str) -> bool {
        let from_main = self.main.lock().remove(key).is_some();
        let from_hot = self.hot.lock().remove(key).is_some();
        from_main || from_hot
    }

    /// Tier currently holding `key`, without touching recency
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        if self.main.lock().contains(key) {
            Some(Tier::Main)
        } else if self.hot.lock().contains(key) {
            Some(Tier::Hot)
        } else {
            None
        }
    }

    /// Snapshot of one tier
    pub fn stats(&self, tier: Tier) -> CacheStats {
        let (cache, metrics) = match tier {
            Tier::Main => (&self.main, &self.main_metrics),
            Tier::Hot => (&self.hot, &self.hot_metrics),
        };
        let cache = cache.lock();
        CacheStats {
            bytes: cache.bytes(),
            max_bytes: cache.max_bytes(),
            items: cache.len() as u64,
            gets: metrics.gets(),
            hits: metrics.hits(),
            evictions: cache.evictions(),
        }
    }

    /// Combined bytes across both tiers
    pub fn total_bytes(&self) -> u64 {
        self.main.lock().bytes() + self.hot.lock().bytes()
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Clear both tiers
    pub fn clear(&self) {
        self.main.lock().clear();
        self.hot.lock().clear();
    }

    fn balance(&self, main: &mut LruCache, hot: &mut LruCache) {
        while main.bytes() + hot.bytes() > self.policy.cache_bytes {
            let victim = if self.policy.hot_is_over_share(main.bytes(), hot.bytes()) {
                &mut *hot
            } else {
                &mut *main
            };
            if victim.remove_oldest().is_none() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("policy", &self.policy)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
