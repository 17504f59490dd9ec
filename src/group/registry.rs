//! Group Registry
//!
//! Process-wide directory of groups by name. All groups share the
//! registry's peer picker and transport.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::{Group, GroupConfig, GroupStatsSnapshot, Loader};
use crate::error::{Error, Result};
use crate::peers::{PeerId, PeerPicker, PeerTransport};

pub struct GroupRegistry {
    groups: DashMap<String, Arc<Group>>,
    picker: Arc<PeerPicker>,
    transport: Option<Arc<dyn PeerTransport>>,
}

impl GroupRegistry {
    pub fn new(picker: Arc<PeerPicker>, transport: Option<Arc<dyn PeerTransport>>) -> Self {
        Self {
            groups: DashMap::new(),
            picker,
            transport,
        }
    }

    /// A registry whose groups never talk to peers
    pub fn standalone() -> Self {
        Self::new(PeerPicker::standalone(), None)
    }

    /// Return the group named `name`, creating it if absent.
    ///
    /// `config` and `loader` are only used on creation.
    pub fn get_or_create(
        &self,
        name: &str,
        config: GroupConfig,
        loader: Arc<dyn Loader>,
    ) -> Arc<Group> {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(group = name, cache_bytes = config.cache_bytes, "Group created");
                Arc::new(Group::new(
                    name,
                    config,
                    loader,
                    self.picker.clone(),
                    self.transport.clone(),
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name).map(|g| g.value().clone())
    }

    /// Like [`get`](Self::get), failing with [`Error::GroupNotFound`]
    pub fn require(&self, name: &str) -> Result<Arc<Group>> {
        self.get(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.remove(name).map(|(_, group)| group)
    }

    /// Registered group names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        names.sort();
        names
    }

    /// Stats of every group, sorted by name
    pub fn stats(&self) -> Vec<GroupStatsSnapshot> {
        let mut stats: Vec<GroupStatsSnapshot> =
            self.groups.iter().map(|g| g.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn picker(&self) -> &Arc<PeerPicker> {
        &self.picker
    }

    /// Replace the peer set shared by every group
    pub fn set_peers<I, P>(&self, peers: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        self.picker.set_peers(peers);
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.names())
            .field("picker", &self.picker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Value;
    use crate::group::{loader_fn, LoaderError};
    use assert_matches::assert_matches;

    fn echo_loader() -> Arc<dyn Loader> {
        Arc::new(loader_fn(|key: String| async move {
            Ok::<_, LoaderError>(Value::from(key.into_bytes()))
        }))
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = GroupRegistry::standalone();
        let first = registry.get_or_create("users", GroupConfig::default(), echo_loader());
        let second = registry.get_or_create(
            "users",
            GroupConfig::default().with_cache_bytes(1),
            echo_loader(),
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().cache_bytes, GroupConfig::default().cache_bytes);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_and_remove() {
        let registry = GroupRegistry::standalone();
        registry.get_or_create("b", GroupConfig::default(), echo_loader());
        registry.get_or_create("a", GroupConfig::default(), echo_loader());

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.get("a").is_some());
        assert_matches!(registry.require("c"), Err(Error::GroupNotFound(name)) if name == "c");

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let registry = GroupRegistry::standalone();
        let a = registry.get_or_create("a", GroupConfig::default(), echo_loader());
        let b = registry.get_or_create("b", GroupConfig::default(), echo_loader());

        a.get("k").await.unwrap();
        assert_eq!(a.stats().local_loads, 1);
        assert_eq!(b.stats().local_loads, 0);

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "a");
    }

    #[test]
    fn test_set_peers_is_shared() {
        let registry = GroupRegistry::new(Arc::new(PeerPicker::new("http://a")), None);
        registry.set_peers(["http://a", "http://b"]);
        assert_eq!(registry.picker().peers().len(), 2);
    }
}
