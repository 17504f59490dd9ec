//! Cache Groups
//!
//! A group is a named, independently budgeted cache with its own loader. It
//! orchestrates a read-through fill:
//!
//! ```text
//! get(key)
//!   ├─ two-tier cache hit ─────────────────────────────▶ value
//!   └─ miss ─▶ coalescer (one fill per key)
//!                ├─ re-check cache
//!                ├─ Owner::Local ─▶ loader ─▶ main tier
//!                └─ Owner::Remote ─▶ transport ─▶ hot tier
//!                                      └─ failure ─▶ loader (fallback)
//! ```
//!
//! Only successful fills are cached. Not-found answers may be remembered for
//! a short time when negative caching is configured.

mod loader;
mod registry;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::cache::{
    AdmissionGate, EvictionListener, HotAdmission, LruCache, Tier, TierPolicy, TieredCache,
    Value, DEFAULT_CACHE_BYTES, DEFAULT_HOT_RATIO,
};
use crate::coalesce::Coalescer;
use crate::error::{Error, Result};
use crate::peers::{Owner, PeerId, PeerPicker, PeerTransport};

pub use loader::{loader_fn, FileLoader, FnLoader, Loader, LoaderError};
pub use registry::GroupRegistry;
pub use stats::{Counter, GroupStats, GroupStatsSnapshot};

/// Default budget of the negative cache
pub const DEFAULT_NEGATIVE_CACHE_BYTES: u64 = 1024 * 1024;

/// Construction-time settings of a group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupConfig {
    /// Byte budget shared by the main and hot tiers
    pub cache_bytes: u64,
    /// Hot allotment = main allotment / hot_ratio
    pub hot_ratio: u64,
    /// Which remote fills are copied into the hot tier
    pub hot_admission: HotAdmission,
    /// Load locally when the owning peer cannot be reached
    pub fallback_to_local: bool,
    /// Remember not-found keys for this long; `None` disables it
    pub negative_ttl: Option<Duration>,
    /// Byte budget of the negative cache
    pub negative_cache_bytes: u64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            cache_bytes: DEFAULT_CACHE_BYTES,
            hot_ratio: DEFAULT_HOT_RATIO,
            hot_admission: HotAdmission::Always,
            fallback_to_local: true,
            negative_ttl: None,
            negative_cache_bytes: DEFAULT_NEGATIVE_CACHE_BYTES,
        }
    }
}

impl GroupConfig {
    pub fn with_cache_bytes(mut self, cache_bytes: u64) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    pub fn with_hot_ratio(mut self, hot_ratio: u64) -> Self {
        self.hot_ratio = hot_ratio;
        self
    }

    pub fn with_hot_admission(mut self, hot_admission: HotAdmission) -> Self {
        self.hot_admission = hot_admission;
        self
    }

    pub fn with_fallback_to_local(mut self, fallback: bool) -> Self {
        self.fallback_to_local = fallback;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = Some(ttl);
        self
    }
}

/// Read-through cache group
pub struct Group {
    name: String,
    config: GroupConfig,
    loader: Arc<dyn Loader>,
    picker: Arc<PeerPicker>,
    transport: Option<Arc<dyn PeerTransport>>,
    cache: TieredCache,
    negative: Option<Mutex<LruCache>>,
    admission: AdmissionGate,
    flights: Coalescer<String, Value, Error>,
    stats: Arc<GroupStats>,
}

impl Group {
    /// Create a group. Without a transport every key is loaded locally.
    pub fn new(
        name: impl Into<String>,
        config: GroupConfig,
        loader: Arc<dyn Loader>,
        picker: Arc<PeerPicker>,
        transport: Option<Arc<dyn PeerTransport>>,
    ) -> Self {
        let policy = TierPolicy::new(config.cache_bytes).with_hot_ratio(config.hot_ratio);
        let negative = config
            .negative_ttl
            .map(|_| Mutex::new(LruCache::new(config.negative_cache_bytes)));

        // Both tiers report departures into the group's counters
        let stats = Arc::new(GroupStats::new());
        let listener: Arc<dyn EvictionListener> = stats.clone();

        Self {
            name: name.into(),
            cache: TieredCache::with_listeners(policy, vec![listener]),
            admission: AdmissionGate::new(config.hot_admission),
            negative,
            config,
            loader,
            picker,
            transport,
            flights: Coalescer::new(),
            stats,
        }
    }

    /// A group with no peers
    pub fn standalone(
        name: impl Into<String>,
        config: GroupConfig,
        loader: Arc<dyn Loader>,
    ) -> Self {
        Self::new(name, config, loader, PeerPicker::standalone(), None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Fetch the value for `key`
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        self.get_with_cancel(key, &CancellationToken::new()).await
    }

    /// Fetch the value for `key`, giving up with [`Error::Cancelled`] once
    /// `cancel` fires
    pub async fn get_with_cancel(&self, key: &str, cancel: &CancellationToken) -> Result<Bytes> {
        self.get_value(key, cancel).await.map(Value::into_bytes)
    }

    /// Fetch the value for `key`, giving up with [`Error::Cancelled`] after
    /// `timeout`
    pub async fn get_with_timeout(&self, key: &str, timeout: Duration) -> Result<Bytes> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(timeout, self.get_with_cancel(key, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(group = %self.name, key, "Get timed out");
                Err(Error::Cancelled)
            }
        }
    }

    /// Fetch the cached entry for `key`, expiry included
    #[instrument(skip(self, cancel), fields(group = %self.name))]
    pub async fn get_value(&self, key: &str, cancel: &CancellationToken) -> Result<Value> {
        self.stats.gets.inc();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some((value, tier)) = self.cache.get(key) {
            self.stats.cache_hits.inc();
            trace!(%tier, "Cache hit");
            return Ok(value);
        }

        if self.is_known_missing(key) {
            self.stats.negative_hits.inc();
            return Err(Error::not_found(key));
        }

        self.stats.loads.inc();
        self.flights
            .execute(key.to_string(), cancel, || self.fill(key, cancel))
            .await
    }

    /// Drop `key` from this process's tiers and negative cache.
    ///
    /// Other peers keep their copies.
    pub fn remove(&self, key: &str) -> bool {
        if let Some(negative) = &self.negative {
            negative.lock().remove(key);
        }
        self.cache.remove(key)
    }

    /// Count a request received from a peer
    pub fn record_server_request(&self) {
        self.stats.server_requests.inc();
    }

    pub fn stats(&self) -> GroupStatsSnapshot {
        GroupStatsSnapshot {
            name: self.name.clone(),
            gets: self.stats.gets.get(),
            cache_hits: self.stats.cache_hits.get(),
            peer_loads: self.stats.peer_loads.get(),
            peer_errors: self.stats.peer_errors.get(),
            loads: self.stats.loads.get(),
            loads_deduped: self.flights.executions(),
            coalesced_waits: self.flights.waits(),
            local_loads: self.stats.local_loads.get(),
            local_load_errors: self.stats.local_load_errors.get(),
            server_requests: self.stats.server_requests.get(),
            negative_hits: self.stats.negative_hits.get(),
            evictions: self.stats.evictions.get(),
            removals: self.stats.removals.get(),
            expirations: self.stats.expirations.get(),
            main: self.cache.stats(Tier::Main),
            hot: self.cache.stats(Tier::Hot),
        }
    }

    /// The single execution behind a coalesced miss
    async fn fill(&self, key: &str, cancel: &CancellationToken) -> Result<Value> {
        // A flight that just finished may have filled the cache
        if let Some((value, _)) = self.cache.peek(key) {
            return Ok(value);
        }

        match (self.picker.pick(key), self.transport.as_deref()) {
            (Owner::Remote(peer), Some(transport)) => {
                self.load_remote(transport, &peer, key, cancel).await
            }
            _ => self.load_local(key).await,
        }
    }

    async fn load_remote(
        &self,
        transport: &dyn PeerTransport,
        peer: &PeerId,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        match transport.fetch(peer, &self.name, key, cancel).await {
            Ok(value) => {
                self.stats.peer_loads.inc();
                if self.admission.admit() {
                    self.cache.add(key, value.clone(), Tier::Hot);
                }
                Ok(value)
            }
            Err(Error::NotFound { .. }) => {
                self.remember_missing(key);
                Err(Error::not_found(key))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                self.stats.peer_errors.inc();
                if !self.config.fallback_to_local {
                    return Err(e);
                }
                warn!(%peer, key, error = %e, "Peer fetch failed, loading locally");
                self.load_local(key).await
            }
        }
    }

    async fn load_local(&self, key: &str) -> Result<Value> {
        match self.loader.load(key).await {
            Ok(value) => {
                self.stats.local_loads.inc();
                self.cache.add(key, value.clone(), Tier::Main);
                Ok(value)
            }
            Err(LoaderError::NotFound) => {
                self.stats.local_load_errors.inc();
                self.remember_missing(key);
                Err(Error::not_found(key))
            }
            Err(LoaderError::Failed(reason)) => {
                self.stats.local_load_errors.inc();
                debug!(key, %reason, "Loader failed");
                Err(Error::LoaderFailure {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    fn remember_missing(&self, key: &str) {
        if let (Some(negative), Some(ttl)) = (&self.negative, self.config.negative_ttl) {
            negative
                .lock()
                .add(key.to_string(), Value::with_ttl(Bytes::new(), ttl));
        }
    }

    fn is_known_missing(&self, key: &str) -> bool {
        self.negative
            .as_ref()
            .map_or(false, |negative| negative.lock().get(key).is_some())
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("flights", &self.flights)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loader answering `value-{key}`, `missing` is not found and `broken`
    /// fails
    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Loader for CountingLoader {
        async fn load(&self, key: &str) -> std::result::Result<Value, LoaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match key {
                "missing" => Err(LoaderError::NotFound),
                "broken" => Err(LoaderError::failed("backing store down")),
                "ephemeral" => Ok(Value::with_ttl(
                    format!("value-{}", key).into_bytes(),
                    Duration::from_millis(20),
                )),
                _ => Ok(Value::from(format!("value-{}", key).into_bytes())),
            }
        }
    }

    /// Transport answering `remote-{key}` or failing every call
    #[derive(Default)]
    struct StubTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeerTransport for StubTransport {
        async fn fetch(
            &self,
            peer: &PeerId,
            _group: &str,
            key: &str,
            _cancel: &CancellationToken,
        ) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::transport(peer.as_str(), "connection refused"));
            }
            if key == "missing" {
                return Err(Error::not_found(key));
            }
            Ok(Value::from(format!("remote-{}", key).into_bytes()))
        }
    }

    /// Picker where every key belongs to another peer
    fn remote_picker() -> Arc<PeerPicker> {
        let picker = Arc::new(PeerPicker::new("http://me"));
        picker.set_peers(["http://other"]);
        picker
    }

    fn local_group(loader: Arc<CountingLoader>, config: GroupConfig) -> Group {
        Group::standalone("test", config, loader)
    }

    fn remote_group(
        loader: Arc<CountingLoader>,
        transport: Arc<StubTransport>,
        config: GroupConfig,
    ) -> Group {
        Group::new("test", config, loader, remote_picker(), Some(transport))
    }

    #[tokio::test]
    async fn test_local_fill_lands_in_main_tier() {
        let loader = Arc::new(CountingLoader::default());
        let group = local_group(loader.clone(), GroupConfig::default());

        assert_eq!(group.get("a").await.unwrap(), Bytes::from("value-a"));
        assert_eq!(group.get("a").await.unwrap(), Bytes::from("value-a"));

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.cache().tier_of("a"), Some(Tier::Main));

        let stats = group.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.local_loads, 1);
        assert_eq!(stats.main.items, 1);
    }

    #[tokio::test]
    async fn test_remote_fill_lands_in_hot_tier() {
        let loader = Arc::new(CountingLoader::default());
        let transport = Arc::new(StubTransport::default());
        let group = remote_group(loader.clone(), transport.clone(), GroupConfig::default());

        assert_eq!(group.get("a").await.unwrap(), Bytes::from("remote-a"));
        assert_eq!(group.get("a").await.unwrap(), Bytes::from("remote-a"));

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(group.cache().tier_of("a"), Some(Tier::Hot));
        assert_eq!(group.stats().peer_loads, 1);
    }

    #[tokio::test]
    async fn test_hot_admission_never_skips_caching() {
        let loader = Arc::new(CountingLoader::default());
        let transport = Arc::new(StubTransport::default());
        let config = GroupConfig::default().with_hot_admission(HotAdmission::Never);
        let group = remote_group(loader, transport.clone(), config);

        group.get("a").await.unwrap();
        group.get("a").await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(group.cache().tier_of("a"), None);
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_to_loader() {
        let loader = Arc::new(CountingLoader::default());
        let transport = Arc::new(StubTransport {
            fail: true,
            ..Default::default()
        });
        let group = remote_group(loader.clone(), transport, GroupConfig::default());

        assert_eq!(group.get("a").await.unwrap(), Bytes::from("value-a"));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.cache().tier_of("a"), Some(Tier::Main));

        let stats = group.stats();
        assert_eq!(stats.peer_errors, 1);
        assert_eq!(stats.local_loads, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_without_fallback() {
        let loader = Arc::new(CountingLoader::default());
        let transport = Arc::new(StubTransport {
            fail: true,
            ..Default::default()
        });
        let config = GroupConfig::default().with_fallback_to_local(false);
        let group = remote_group(loader.clone(), transport, config);

        assert_matches!(group.get("a").await, Err(Error::TransportFailure { .. }));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(group.cache().tier_of("a"), None);
    }

    #[tokio::test]
    async fn test_remote_not_found_does_not_fall_back() {
        let loader = Arc::new(CountingLoader::default());
        let transport = Arc::new(StubTransport::default());
        let group = remote_group(loader.clone(), transport, GroupConfig::default());

        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_gets_load_once() {
        let loader = Arc::new(CountingLoader {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let group = local_group(loader.clone(), GroupConfig::default());

        let results = futures::future::join_all((0..10).map(|_| group.get("k"))).await;

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), Bytes::from("value-k"));
        }
        let stats = group.stats();
        assert_eq!(stats.loads_deduped, 1);
        assert_eq!(stats.coalesced_waits, 9);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let loader = Arc::new(CountingLoader::default());
        let group = local_group(loader.clone(), GroupConfig::default());

        let err = group.get("broken").await.unwrap_err();
        assert_matches!(
            err,
            Error::LoaderFailure { ref reason, .. } if reason == "backing store down"
        );
        assert_matches!(group.get("broken").await, Err(Error::LoaderFailure { .. }));

        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));

        assert_eq!(loader.calls.load(Ordering::SeqCst), 4);
        assert_eq!(group.cache().total_bytes(), 0);
        assert_eq!(group.stats().local_load_errors, 4);
    }

    #[tokio::test]
    async fn test_negative_cache_remembers_missing_keys() {
        let loader = Arc::new(CountingLoader::default());
        let config = GroupConfig::default().with_negative_ttl(Duration::from_secs(60));
        let group = local_group(loader.clone(), config);

        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().negative_hits, 1);

        // Removal forgets the negative entry too
        group.remove("missing");
        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_negative_cache_entries_expire() {
        let loader = Arc::new(CountingLoader::default());
        let config = GroupConfig::default().with_negative_ttl(Duration::from_millis(20));
        let group = local_group(loader.clone(), config);

        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_matches!(group.get("missing").await, Err(Error::NotFound { .. }));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remove_forces_reload() {
        let loader = Arc::new(CountingLoader::default());
        let group = local_group(loader.clone(), GroupConfig::default());

        group.get("a").await.unwrap();
        assert!(group.remove("a"));
        assert!(!group.remove("a"));
        group.get("a").await.unwrap();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_with_timeout() {
        let loader = Arc::new(CountingLoader {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let group = local_group(loader, GroupConfig::default());

        let result = group.get_with_timeout("slow", Duration::from_millis(20)).await;
        assert_matches!(result, Err(Error::Cancelled));
        assert_eq!(group.cache().tier_of("slow"), None);
    }

    #[tokio::test]
    async fn test_pre_cancelled_get() {
        let loader = Arc::new(CountingLoader::default());
        let group = local_group(loader.clone(), GroupConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        assert_matches!(group.get_with_cancel("a", &token).await, Err(Error::Cancelled));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_miss_counts_one_lookup_per_tier() {
        let loader = Arc::new(CountingLoader::default());
        let group = local_group(loader, GroupConfig::default());

        group.get("a").await.unwrap();
        let stats = group.stats();
        assert_eq!((stats.main.gets, stats.main.hits), (1, 0));
        assert_eq!((stats.hot.gets, stats.hot.hits), (1, 0));

        group.get("a").await.unwrap();
        let stats = group.stats();
        assert_eq!((stats.main.gets, stats.main.hits), (2, 1));
        assert_eq!(stats.hot.gets, 1);
    }

    #[tokio::test]
    async fn test_departures_are_counted_by_reason() {
        let loader = Arc::new(CountingLoader::default());
        // Room for two `kN` entries holding `value-kN`
        let entry = crate::cache::entry_size("k0", &Value::from("value-k0"));
        let config = GroupConfig::default().with_cache_bytes(2 * entry);
        let group = local_group(loader.clone(), config);

        for key in ["k0", "k1", "k2"] {
            group.get(key).await.unwrap();
        }
        assert_eq!(group.stats().evictions, 1);
        assert_eq!(group.cache().tier_of("k0"), None);

        assert!(group.remove("k2"));
        assert_eq!(group.stats().removals, 1);

        group.get("ephemeral").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        group.get("ephemeral").await.unwrap();

        let stats = group.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_budget_never_caches() {
        let loader = Arc::new(CountingLoader::default());
        let group = local_group(loader.clone(), GroupConfig::default().with_cache_bytes(0));

        group.get("a").await.unwrap();
        group.get("a").await.unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }
}
