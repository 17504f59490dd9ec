//! Peer Membership
//!
//! Peer identities and the picker that decides which peer owns a key.
//!
//! The picker keeps this process's copy of the hash ring behind a
//! reader/writer lock: lookups take the read lock, membership changes
//! rebuild the ring off-lock and swap it in under the write lock. There is
//! no distributed coordination; processes agree on ownership because they
//! apply the same peer list and the ring is order-independent.

mod http;
mod transport;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ring::{default_hash, HashFn, HashRing, DEFAULT_REPLICAS};

pub use http::{
    normalize_base_path, HttpConfig, HttpTransport, DEFAULT_BASE_PATH, EXPIRES_HEADER,
};
pub use transport::PeerTransport;

/// Opaque peer identifier, typically the peer's base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Outcome of an ownership lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// This process owns the key, or there is no cluster
    Local,
    /// A remote peer owns the key
    Remote(PeerId),
}

/// Maps keys to owners using this process's copy of the ring
pub struct PeerPicker {
    self_id: PeerId,
    replicas: usize,
    hash: HashFn,
    ring: RwLock<HashRing<PeerId>>,
}

impl PeerPicker {
    /// Create a picker with the default replica count and hash function
    pub fn new(self_id: impl Into<PeerId>) -> Self {
        Self::with_ring(self_id, DEFAULT_REPLICAS, default_hash)
    }

    /// Create a picker with a custom replica count and hash function
    pub fn with_ring(self_id: impl Into<PeerId>, replicas: usize, hash: HashFn) -> Self {
        Self {
            self_id: self_id.into(),
            replicas,
            hash,
            ring: RwLock::new(HashRing::with_hasher(replicas, hash)),
        }
    }

    /// A picker with no peers: every key is local
    pub fn standalone() -> Arc<Self> {
        Arc::new(Self::new("self"))
    }

    /// Atomically replace the ring membership
    pub fn set_peers<I, P>(&self, peers: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        let mut ring = HashRing::with_hasher(self.replicas, self.hash);
        ring.add(peers.into_iter().map(Into::into));
        let members = ring.members().len();

        *self.ring.write() = ring;
        info!(self_id = %self.self_id, members, "Peer set replaced");
    }

    /// Add peers to the current membership
    pub fn add_peers<I, P>(&self, peers: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        self.ring.write().add(peers.into_iter().map(Into::into));
    }

    /// Remove a peer; returns true if it was a member
    pub fn remove_peer(&self, peer: &PeerId) -> bool {
        self.ring.write().remove(peer) > 0
    }

    /// Decide who owns `key`
    pub fn pick(&self, key: &str) -> Owner {
        match self.ring.read().get(key) {
            Some(peer) if peer != &self.self_id => Owner::Remote(peer.clone()),
            _ => Owner::Local,
        }
    }

    /// Current members, sorted
    pub fn peers(&self) -> Vec<PeerId> {
        self.ring.read().members()
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// True when no peers are configured
    pub fn is_standalone(&self) -> bool {
        self.ring.read().is_empty()
    }
}

impl std::fmt::Debug for PeerPicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPicker")
            .field("self_id", &self.self_id)
            .field("replicas", &self.replicas)
            .field("ring", &*self.ring.read())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
