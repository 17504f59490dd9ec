//! HTTP Peer Transport
//!
//! Fetches values from peers over `GET {peer}{base_path}{group}/{key}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::transport::PeerTransport;
use super::PeerId;
use crate::cache::Value;
use crate::error::{Error, Result};

/// Default URL prefix for peer requests
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

/// Response header carrying the remaining lifetime of an expiring value
pub const EXPIRES_HEADER: &str = "x-peercache-expires-in-ms";

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// URL prefix shared by every peer
    pub base_path: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Normalize a base path to the `/prefix/` form
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// reqwest-based peer transport
pub struct HttpTransport {
    client: Client,
    base_path: String,
}

impl HttpTransport {
    /// Create a transport with its own connection pool
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_path: normalize_base_path(&config.base_path),
        })
    }

    /// URL for `key` of `group` on `peer`
    pub fn url_for(&self, peer: &PeerId, group: &str, key: &str) -> String {
        format!(
            "{}{}{}/{}",
            peer.as_str().trim_end_matches('/'),
            self.base_path,
            urlencoding::encode(group),
            urlencoding::encode(key)
        )
    }

    async fn request(&self, peer: &PeerId, url: &str, key: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::transport(peer.as_str(), e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let ttl = response
                    .headers()
                    .get(EXPIRES_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_millis);

                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::transport(peer.as_str(), e.to_string()))?;

                Ok(match ttl {
                    Some(ttl) => Value::with_ttl(body, ttl),
                    None => Value::new(body),
                })
            }
            StatusCode::NOT_FOUND => Err(Error::not_found(key)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::transport(
                    peer.as_str(),
                    format!("HTTP {}: {}", status, body.trim()),
                ))
            }
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_path", &self.base_path)
            .finish()
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    #[instrument(skip(self, cancel), fields(peer = %peer))]
    async fn fetch(
        &self,
        peer: &PeerId,
        group: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let url = self.url_for(peer, group, key);
        debug!("Fetching {}", url);

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.request(peer, &url, key) => result,
        }
    }
}
