//! Peer Transport Port
//!
//! Abstraction over fetching a value from the peer that owns it. The cache
//! only distinguishes success from failure; protocol-specific error
//! classification (e.g. mapping a remote "not found" to
//! [`Error::NotFound`](crate::error::Error::NotFound)) is the
//! implementation's job.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::PeerId;
use crate::cache::Value;
use crate::error::Result;

/// Fetches a value already computed by its owning peer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetch `key` of `group` from `peer`.
    ///
    /// Implementations must stop waiting on the peer once `cancel` fires and
    /// return [`Error::Cancelled`](crate::error::Error::Cancelled).
    async fn fetch(
        &self,
        peer: &PeerId,
        group: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Value>;
}
