//! Two-Tier Byte-Bounded Cache
//!
//! Local storage for fill results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TieredCache                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Main tier (owned keys)          │  Hot tier (remote keys)   │
//! │  ┌────────────────────────────┐  │  ┌─────────────────────┐  │
//! │  │ LruCache                   │  │  │ LruCache            │  │
//! │  │ allotment = budget         │  │  │ allotment = main/8  │  │
//! │  └────────────────────────────┘  │  └─────────────────────┘  │
//! │                 │                              │             │
//! │                 └──── cross-tier balancing ────┘             │
//! │                   (main + hot <= budget)                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sizes are accounted in bytes (key + payload + fixed overhead), so
//! workloads with heterogeneous value sizes stay bounded.

mod entry;
mod lru;
mod metrics;
mod policy;
mod tiered;

pub use entry::{entry_size, Value, ENTRY_OVERHEAD};
pub use lru::{EvictionListener, EvictionReason, LruCache};
pub use metrics::{CacheStats, TierMetrics};
pub use policy::{AdmissionGate, HotAdmission, TierPolicy, DEFAULT_HOT_RATIO};
pub use tiered::{Tier, TieredCache};

/// Default per-group cache budget (64MB)
pub const DEFAULT_CACHE_BYTES: u64 = 64 * 1024 * 1024;
