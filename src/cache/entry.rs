//! Cached Values
//!
//! Payload bytes plus an optional absolute expiry.

use std::time::{Duration, Instant};

use bytes::Bytes;

/// Fixed per-entry bookkeeping charge added to key and payload bytes
pub const ENTRY_OVERHEAD: u64 = 32;

/// A cached value (zero-copy via `Bytes`).
#[derive(Clone, PartialEq, Eq)]
pub struct Value {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl Value {
    /// Create a value that never expires
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            expires_at: None,
        }
    }

    /// Create a value that expires at `expires_at`
    pub fn with_expiry(data: impl Into<Bytes>, expires_at: Instant) -> Self {
        Self {
            data: data.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Create a value that expires `ttl` from now
    pub fn with_ttl(data: impl Into<Bytes>, ttl: Duration) -> Self {
        Self::with_expiry(data, Instant::now() + ttl)
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    #[inline]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Time left before expiry, `None` if the value never expires.
    /// Saturates at zero once expired.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Payload size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check expiry against `now`
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<&'static str> for Value {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("len", &self.data.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Bytes charged against a tier's budget for `key` holding `value`.
#[inline]
pub fn entry_size(key: &str, value: &Value) -> u64 {
    key.len() as u64 + value.len() as u64 + ENTRY_OVERHEAD
}
