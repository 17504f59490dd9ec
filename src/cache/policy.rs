//! Tier Budget and Admission Policies
//!
//! How the byte budget is split between the main and hot tiers, and which
//! remote fills are admitted into the hot tier.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Default main:hot ratio (hot tier gets 1/8 of the main allotment)
pub const DEFAULT_HOT_RATIO: u64 = 8;

/// Budget split between tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// Total byte budget shared by both tiers
    pub cache_bytes: u64,
    /// Hot allotment = main allotment / hot_ratio
    pub hot_ratio: u64,
}

impl TierPolicy {
    pub fn new(cache_bytes: u64) -> Self {
        Self {
            cache_bytes,
            hot_ratio: DEFAULT_HOT_RATIO,
        }
    }

    pub fn with_hot_ratio(mut self, hot_ratio: u64) -> Self {
        self.hot_ratio = hot_ratio.max(1);
        self
    }

    /// Main tier allotment
    pub fn main_bytes(&self) -> u64 {
        self.cache_bytes
    }

    /// Hot tier allotment, derived from the main allotment
    pub fn hot_bytes(&self) -> u64 {
        self.main_bytes() / self.hot_ratio.max(1)
    }

    /// Whether the hot tier should give up an entry during cross-tier
    /// balancing, given the current usage of both tiers.
    pub fn hot_is_over_share(&self, main_used: u64, hot_used: u64) -> bool {
        hot_used > main_used / self.hot_ratio.max(1)
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::new(super::DEFAULT_CACHE_BYTES)
    }
}

/// Which remote fills get a copy in the hot tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotAdmission {
    /// Every remote fill is cached
    #[default]
    Always,
    /// Every n-th remote fill is cached
    OneIn(u32),
    /// Remote fills are never cached locally
    Never,
}

/// Stateful gate applying a [`HotAdmission`] policy
#[derive(Debug, Default)]
pub struct AdmissionGate {
    policy: HotAdmission,
    seen: AtomicU64,
}

impl AdmissionGate {
    pub fn new(policy: HotAdmission) -> Self {
        Self {
            policy,
            seen: AtomicU64::new(0),
        }
    }

    /// Decide whether the next remote fill enters the hot tier
    pub fn admit(&self) -> bool {
        match self.policy {
            HotAdmission::Always => true,
            HotAdmission::Never => false,
            HotAdmission::OneIn(0) | HotAdmission::OneIn(1) => true,
            HotAdmission::OneIn(n) => {
                let seen = self.seen.fetch_add(1, Ordering::Relaxed);
                seen % n as u64 == 0
            }
        }
    }

    pub fn policy(&self) -> HotAdmission {
        self.policy
    }
}
