//! Ring Hash Functions
//!
//! Fast non-cryptographic 64-bit hashing for ring positions.

/// Hash function used to place keys and virtual nodes on the ring.
pub type HashFn = fn(&[u8]) -> u64;

/// Default ring hash: FxHash over the bytes followed by a 64-bit avalanche
/// finalizer so that short, similar inputs land far apart on the ring.
pub fn default_hash(bytes: &[u8]) -> u64 {
    fmix64(fx_hash(bytes) ^ bytes.len() as u64)
}

/// FxHash algorithm
#[inline]
fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// MurmurHash3 64-bit finalizer
#[inline]
fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}
