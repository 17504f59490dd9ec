//! Consistent Hash Ring
//!
//! Maps keys to owning peers. Each peer is placed on the ring `replicas`
//! times; a key belongs to the first virtual node at or after its hash,
//! wrapping around to the smallest position.
//!
//! ```text
//!   0 ──── 2(a) ──── 4(b) ──── 6(c) ──── 12(a) ─── ... ─── 26(c) ──┐
//!   ▲                                                              │
//!   └──────────────────────────── wrap ────────────────────────────┘
//! ```
//!
//! Ring content depends only on the set of peers added, not on the order in
//! which they were added, so every process in a cluster that applies the
//! same membership computes the same owners without coordination. The one
//! exception is an exact hash collision between two peers' virtual nodes,
//! where the most recent `add` wins.

mod hash;

use std::collections::{BTreeMap, BTreeSet};

pub use hash::{default_hash, HashFn};

/// Default number of virtual nodes per peer
pub const DEFAULT_REPLICAS: usize = 50;

/// Consistent hash ring over peer identifiers of type `N`.
#[derive(Clone)]
pub struct HashRing<N> {
    replicas: usize,
    hash: HashFn,
    positions: BTreeMap<u64, N>,
}

impl<N> HashRing<N>
where
    N: AsRef<[u8]> + Clone + Ord,
{
    /// Create an empty ring using the default hash function
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, default_hash)
    }

    /// Create an empty ring with a custom hash function
    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        Self {
            replicas,
            hash,
            positions: BTreeMap::new(),
        }
    }

    /// Add peers to the ring.
    pub fn add<I>(&mut self, peers: I)
    where
        I: IntoIterator<Item = N>,
    {
        for peer in peers {
            for i in 0..self.replicas {
                let position = self.replica_hash(i, &peer);
                self.positions.insert(position, peer.clone());
            }
        }
    }

    /// Remove every virtual node owned by `peer`.
    ///
    /// Returns the number of positions removed.
    pub fn remove(&mut self, peer: &N) -> usize {
        let before = self.positions.len();
        self.positions.retain(|_, owner| owner != peer);
        before - self.positions.len()
    }

    /// Find the owner of `key`, or `None` if the ring is empty.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&N> {
        if self.positions.is_empty() {
            return None;
        }

        let h = (self.hash)(key.as_ref());
        self.positions
            .range(h..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, peer)| peer)
    }

    /// Distinct peers currently on the ring, in sorted order.
    pub fn members(&self) -> Vec<N> {
        self.positions
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check whether `peer` has at least one position on the ring
    pub fn contains(&self, peer: &N) -> bool {
        self.positions.values().any(|owner| owner == peer)
    }

    /// Number of virtual node positions
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Virtual nodes per peer
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Position of the `i`-th replica: hash of the decimal index followed by
    /// the peer's bytes.
    fn replica_hash(&self, i: usize, peer: &N) -> u64 {
        let mut label = i.to_string().into_bytes();
        label.extend_from_slice(peer.as_ref());
        (self.hash)(&label)
    }
}

impl<N> std::fmt::Debug for HashRing<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("positions", &self.positions.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Treats the key as a decimal integer so positions are predictable.
    fn int_hash(bytes: &[u8]) -> u64 {
        std::str::from_utf8(bytes).unwrap().parse().unwrap()
    }

    fn assert_owners(ring: &HashRing<&'static str>, cases: &HashMap<&str, &str>) {
        for (key, owner) in cases {
            assert_eq!(ring.get(key), Some(owner), "owner of key {}", key);
        }
    }

    #[test]
    fn test_hashing() {
        let mut ring = HashRing::with_hasher(3, int_hash);

        // Positions: 2, 4, 6, 12, 14, 16, 22, 24, 26
        ring.add(["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        let mut cases = HashMap::from([("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")]);
        assert_owners(&ring, &cases);

        // Adds 8, 18, 28
        ring.add(["8"]);
        cases.insert("27", "8");
        assert_owners(&ring, &cases);
    }

    #[test]
    fn test_wraps_past_largest_position() {
        let mut ring = HashRing::with_hasher(1, int_hash);
        ring.add(["10", "20"]);

        assert_eq!(ring.get("21"), Some(&"10"));
        assert_eq!(ring.get("20"), Some(&"20"));
        assert_eq!(ring.get("0"), Some(&"10"));
    }

    #[test]
    fn test_empty_ring() {
        let ring: HashRing<String> = HashRing::new(DEFAULT_REPLICAS);
        assert!(ring.is_empty());
        assert_eq!(ring.get("anything"), None);
        assert!(ring.members().is_empty());
    }

    #[test]
    fn test_consistency() {
        let mut ring1 = HashRing::new(1);
        let mut ring2 = HashRing::new(1);

        ring1.add(["Bill", "Bob", "Bonny"]);
        ring2.add(["Bob", "Bonny", "Bill"]);
        assert_eq!(ring1.get("Ben"), ring2.get("Ben"));

        ring2.add(["Becky", "Ben", "Bobby"]);
        ring1.add(["Becky", "Ben", "Bobby"]);

        assert_eq!(ring1.get("Ben"), ring2.get("Ben"));
        assert_eq!(ring1.get("Bob"), ring2.get("Bob"));
        assert_eq!(ring1.get("Bonny"), ring2.get("Bonny"));
    }

    #[test]
    fn test_remove_restores_previous_owners() {
        let mut ring = HashRing::with_hasher(3, int_hash);
        ring.add(["6", "4", "2"]);
        ring.add(["8"]);
        assert_eq!(ring.get("27"), Some(&"8"));

        assert_eq!(ring.remove(&"8"), 3);
        assert_eq!(ring.get("27"), Some(&"2"));
        assert!(!ring.contains(&"8"));
        assert_eq!(ring.members(), vec!["2", "4", "6"]);
    }

    #[test]
    fn test_distribution() {
        let hosts = ["a.svc.local", "b.svc.local", "c.svc.local"];
        let mut ring = HashRing::new(512);
        ring.add(hosts);

        const CASES: usize = 10_000;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in 0..CASES {
            let key = format!("192.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff);
            *counts.entry(*ring.get(&key).unwrap()).or_default() += 1;
        }

        for host in hosts {
            let share = counts[host] as f64 / CASES as f64;
            assert!(
                (0.20..0.47).contains(&share),
                "host {} owns {:.3} of keys",
                host,
                share
            );
        }
    }

    proptest! {
        #[test]
        fn prop_owner_independent_of_insertion_order(
            peers in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
            keys in proptest::collection::vec("[a-z0-9]{1,12}", 1..32),
            rotation in 0usize..8,
        ) {
            let forward: Vec<String> = peers.iter().cloned().collect();
            let mut shuffled = forward.clone();
            shuffled.reverse();
            let len = shuffled.len();
            shuffled.rotate_left(rotation % len);

            let mut ring1 = HashRing::new(16);
            let mut ring2 = HashRing::new(16);
            ring1.add(forward);
            ring2.add(shuffled);

            for key in &keys {
                prop_assert_eq!(ring1.get(key), ring2.get(key));
            }
        }

        #[test]
        fn prop_adding_peer_only_moves_keys_to_it(
            peers in proptest::collection::btree_set("[a-z]{1,8}", 1..6),
            newcomer in "[A-Z]{1,8}",
            keys in proptest::collection::vec("[a-z0-9]{1,12}", 1..64),
        ) {
            let mut ring = HashRing::new(8);
            ring.add(peers.iter().cloned());
            let before: Vec<String> = keys.iter().map(|k| ring.get(k).unwrap().clone()).collect();

            ring.add([newcomer.clone()]);
            for (key, old_owner) in keys.iter().zip(before) {
                let owner = ring.get(key).unwrap();
                prop_assert!(owner == &old_owner || owner == &newcomer);
            }
        }
    }
}
