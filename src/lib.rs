//! peercache - Distributed Read-Through Cache
//!
//! Every process in a cluster runs the same set of named cache groups. A
//! consistent-hash ring assigns each key an owning peer; the owner computes
//! the value with the group's loader and keeps it in its main tier, while
//! other peers fetch it from the owner and keep a copy in a smaller hot tier.
//! Concurrent misses for the same key are coalesced into a single fill.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Group                              │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────┐  │
//! │  │ TieredCache│   │ Coalescer  │   │ PeerPicker (HashRing)│  │
//! │  │ main | hot │   │ per-key    │   │ Local | Remote(peer) │  │
//! │  └────────────┘   └────────────┘   └──────────────────────┘  │
//! │          ▲                 │                 │               │
//! │          └──── fill ───────┴── Loader / PeerTransport        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`ring`] - Consistent-hash ring
//! - [`cache`] - Byte-budgeted LRU and the two-tier cache
//! - [`coalesce`] - Per-key call coalescing
//! - [`peers`] - Peer identities, ownership lookup and transports
//! - [`group`] - Read-through groups, loaders and the group registry
//! - [`server`] - HTTP server for peers and operators
//! - [`monitoring`] - Prometheus exposition
//! - [`config`] - Node configuration
//! - [`error`] - Error types

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod group;
pub mod monitoring;
pub mod peers;
pub mod ring;
pub mod server;

// Re-export commonly used types
pub use cache::{HotAdmission, Tier, TieredCache, Value};
pub use config::{GroupSpec, NodeConfig};
pub use error::{Error, ErrorKind, Result};
pub use group::{FileLoader, Group, GroupConfig, GroupRegistry, Loader, LoaderError};
pub use peers::{HttpTransport, Owner, PeerId, PeerPicker, PeerTransport};
pub use ring::HashRing;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
