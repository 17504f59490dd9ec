//! Bounded LRU Cache
//!
//! Byte-budgeted least-recently-used map. Entries live in a slab of nodes
//! threaded onto an intrusive doubly linked list (head = oldest,
//! tail = newest), giving O(1) lookup, touch, insert and eviction.
//!
//! The cache itself is not synchronized; tiers wrap it in a mutex that is
//! held only for the map/list mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::entry::{entry_size, Value};

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Dropped to get back under the byte budget
    Evicted,
    /// Deleted explicitly
    Removed,
    /// Found expired on read
    Expired,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Evicted => write!(f, "evicted"),
            EvictionReason::Removed => write!(f, "removed"),
            EvictionReason::Expired => write!(f, "expired"),
        }
    }
}

/// Observer notified synchronously for every entry leaving a cache.
///
/// Called while the owning tier's lock is held: implementations must not
/// call back into the cache.
pub trait EvictionListener: Send + Sync {
    fn on_evict(&self, key: &str, value: &Value, reason: EvictionReason);
}

struct Node {
    key: String,
    value: Value,
    size: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Byte-bounded LRU cache
pub struct LruCache {
    max_bytes: u64,
    bytes: u64,
    index: HashMap<String, usize>,
    slots: Vec<Node>,
    free: Vec<usize>,
    /// Least recently used
    head: Option<usize>,
    /// Most recently used
    tail: Option<usize>,
    listeners: Vec<Arc<dyn EvictionListener>>,
    evictions: u64,
}

impl LruCache {
    /// Create a cache holding at most `max_bytes`
    pub fn new(max_bytes: u64) -> Self {
        Self::with_listeners(max_bytes, Vec::new())
    }

    /// Create a cache with a fixed set of eviction listeners
    pub fn with_listeners(max_bytes: u64, listeners: Vec<Arc<dyn EvictionListener>>) -> Self {
        Self {
            max_bytes,
            bytes: 0,
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            listeners,
            evictions: 0,
        }
    }

    /// Look up `key` and mark it most recently used.
    ///
    /// An expired entry is dropped and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let idx = *self.index.get(key)?;

        if self.slots[idx].value.is_expired_at(Instant::now()) {
            self.remove_at(idx, EvictionReason::Expired);
            return None;
        }

        self.unlink(idx);
        self.push_back(idx);
        Some(self.slots[idx].value.clone())
    }

    /// Look up `key` without touching recency
    pub fn peek(&self, key: &str) -> Option<&Value> {
        let idx = *self.index.get(key)?;
        let value = &self.slots[idx].value;
        (!value.is_expired()).then_some(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or replace `key`, then evict oldest entries until back under
    /// budget.
    ///
    /// Returns `false` if the entry alone exceeds the budget; any previous
    /// value for `key` is removed in that case so no stale copy survives.
    pub fn add(&mut self, key: String, value: Value) -> bool {
        let size = entry_size(&key, &value);

        if size > self.max_bytes {
            if let Some(&idx) = self.index.get(&key) {
                self.remove_at(idx, EvictionReason::Removed);
            }
            return false;
        }

        if let Some(&idx) = self.index.get(&key) {
            let node = &mut self.slots[idx];
            self.bytes = self.bytes - node.size + size;
            node.size = size;
            node.value = value;
            self.unlink(idx);
            self.push_back(idx);
        } else {
            let idx = self.alloc(Node {
                key: key.clone(),
                value,
                size,
                prev: None,
                next: None,
            });
            self.push_back(idx);
            self.index.insert(key, idx);
            self.bytes += size;
        }

        while self.bytes > self.max_bytes {
            if self.remove_oldest().is_none() {
                break;
            }
        }

        true
    }

    /// Delete `key` unconditionally
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = *self.index.get(key)?;
        Some(self.remove_at(idx, EvictionReason::Removed).1)
    }

    /// Evict exactly one least recently used entry
    pub fn remove_oldest(&mut self) -> Option<(String, Value)> {
        let idx = self.head?;
        Some(self.remove_at(idx, EvictionReason::Evicted))
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            keys.push(self.slots[idx].key.clone());
            cursor = self.slots[idx].next;
        }
        keys
    }

    /// Drop every entry without notifying listeners
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.bytes = 0;
    }

    /// Tracked bytes in use
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entries evicted for capacity since creation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn remove_at(&mut self, idx: usize, reason: EvictionReason) -> (String, Value) {
        self.unlink(idx);

        let node = &mut self.slots[idx];
        let key = std::mem::take(&mut node.key);
        let value = std::mem::replace(&mut node.value, Value::new(bytes::Bytes::new()));
        self.bytes -= node.size;
        node.size = 0;

        self.index.remove(&key);
        self.free.push(idx);

        if reason == EvictionReason::Evicted {
            self.evictions += 1;
        }
        for listener in &self.listeners {
            listener.on_evict(&key, &value, reason);
        }

        (key, value)
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = node;
                idx
            }
            None => {
                self.slots.push(node);
                self.slots.len() - 1
            }
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn push_back(&mut self, idx: usize) {
        self.slots[idx].prev = self.tail;
        self.slots[idx].next = None;
        match self.tail {
            Some(t) => self.slots[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("entries", &self.index.len())
            .field("bytes", &self.bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::ENTRY_OVERHEAD;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(String, EvictionReason)>>,
    }

    impl EvictionListener for RecordingListener {
        fn on_evict(&self, key: &str, _value: &Value, reason: EvictionReason) {
            self.events.lock().push((key.to_string(), reason));
        }
    }

    fn value(len: usize) -> Value {
        Value::from(vec![7u8; len])
    }

    /// Budget that fits exactly `n` entries with 2-byte keys and 10-byte values
    fn budget_for(n: u64) -> u64 {
        n * (2 + 10 + ENTRY_OVERHEAD)
    }

    #[test]
    fn test_lru_add_get() {
        let mut cache = LruCache::new(1024);
        assert!(cache.add("a".into(), Value::from("one")));
        assert_eq!(cache.get("a").unwrap().data().as_ref(), b"one");
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 1 + 3 + ENTRY_OVERHEAD);
    }

    #[test]
    fn test_lru_replace_updates_size() {
        let mut cache = LruCache::new(1024);
        cache.add("k".into(), value(10));
        cache.add("k".into(), value(50));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 1 + 50 + ENTRY_OVERHEAD);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let listener = Arc::new(RecordingListener::default());
        let listeners: Vec<Arc<dyn EvictionListener>> = vec![listener.clone()];
        let mut cache = LruCache::with_listeners(budget_for(3), listeners);

        for key in ["k0", "k1", "k2"] {
            cache.add(key.into(), value(10));
        }
        // Touch k0 so k1 becomes the oldest
        cache.get("k0");
        cache.add("k3".into(), value(10));

        assert_eq!(cache.keys(), vec!["k2", "k0", "k3"]);
        assert_eq!(cache.evictions(), 1);
        assert_eq!(
            *listener.events.lock(),
            vec![("k1".to_string(), EvictionReason::Evicted)]
        );
    }

    #[test]
    fn test_lru_never_exceeds_budget() {
        let mut cache = LruCache::new(budget_for(5));
        for i in 0..100 {
            cache.add(format!("{:02}", i), value(10));
            assert!(cache.bytes() <= cache.max_bytes());
        }
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.keys(), vec!["95", "96", "97", "98", "99"]);
        assert_eq!(cache.evictions(), 95);
    }

    #[test]
    fn test_lru_rejects_oversized_entry() {
        let mut cache = LruCache::new(budget_for(1));
        cache.add("k0".into(), value(10));
        assert!(!cache.add("k0".into(), value(1000)));
        assert!(cache.is_empty());
        assert_eq!(cache.bytes(), 0);
    }

    #[test]
    fn test_lru_remove_reports_reason() {
        let listener = Arc::new(RecordingListener::default());
        let listeners: Vec<Arc<dyn EvictionListener>> = vec![listener.clone()];
        let mut cache = LruCache::with_listeners(1024, listeners);
        cache.add("a".into(), value(1));

        assert!(cache.remove("a").is_some());
        assert!(cache.remove("a").is_none());
        assert_eq!(cache.bytes(), 0);
        assert_eq!(cache.evictions(), 0);
        assert_eq!(
            *listener.events.lock(),
            vec![("a".to_string(), EvictionReason::Removed)]
        );
    }

    #[test]
    fn test_lru_remove_oldest() {
        let mut cache = LruCache::new(1024);
        cache.add("a".into(), value(1));
        cache.add("b".into(), value(1));

        let (key, _) = cache.remove_oldest().unwrap();
        assert_eq!(key, "a");
        assert_eq!(cache.keys(), vec!["b"]);
        cache.remove_oldest();
        assert!(cache.remove_oldest().is_none());
    }

    #[test]
    fn test_lru_lazy_expiry() {
        let listener = Arc::new(RecordingListener::default());
        let listeners: Vec<Arc<dyn EvictionListener>> = vec![listener.clone()];
        let mut cache = LruCache::with_listeners(1024, listeners);
        cache.add("stale".into(), Value::with_expiry(vec![1u8], Instant::now()));
        cache.add(
            "fresh".into(),
            Value::with_ttl(vec![1u8], Duration::from_secs(60)),
        );

        assert!(!cache.contains("stale"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("stale").is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").is_some());
        assert_eq!(
            *listener.events.lock(),
            vec![("stale".to_string(), EvictionReason::Expired)]
        );
    }

    #[test]
    fn test_lru_slot_reuse() {
        let mut cache = LruCache::new(budget_for(2));
        for i in 0..50 {
            cache.add(format!("{:02}", i), value(10));
        }
        // Freed slots are recycled instead of growing the slab
        assert!(cache.slots.len() <= 3);
    }

    #[test]
    fn test_lru_clear() {
        let mut cache = LruCache::new(1024);
        cache.add("a".into(), value(1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.bytes(), 0);
        assert!(cache.keys().is_empty());
        cache.add("b".into(), value(1));
        assert_eq!(cache.keys(), vec!["b"]);
    }
}
