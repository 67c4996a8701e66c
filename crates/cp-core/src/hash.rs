//! Hash functions for Clearpage
//!
//! Uses Murmur3 32-bit with two different seeds to create a 64-bit composite key.
//! The composite is rendered as 16 lowercase hex digits and used for URL cache
//! keys and host rule signatures, so it must stay stable across releases.

/// 64-bit hash represented as two 32-bit parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash64 {
    pub lo: u32,
    pub hi: u32,
}

impl Hash64 {
    /// Convert to a single u64.
    #[inline]
    pub const fn to_u64(&self) -> u64 {
        ((self.hi as u64) << 32) | (self.lo as u64)
    }

    /// Render as a fixed-width hex string (used inside store keys).
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.to_u64())
    }
}

// Default seeds for the two hash functions
const SEED_LO: u32 = 0x9e3779b9; // Golden ratio
const SEED_HI: u32 = 0x85ebca6b; // Murmur3 constant

/// Murmur3 32-bit hash implementation.
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let len = data.len();
    let mut h = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);

        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = chunks.remainder();
    let mut k: u32 = 0;
    if tail.len() >= 3 {
        k ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k ^= tail[0] as u32;
        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);
        h ^= k;
    }

    // Finalization
    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;

    h
}

/// Compute 64-bit hash as (lo, hi) pair using two Murmur3 passes.
#[inline]
pub fn hash64(data: &[u8]) -> Hash64 {
    Hash64 {
        lo: murmur3_32(data, SEED_LO),
        hi: murmur3_32(data, SEED_HI),
    }
}

/// Hash a URL for use in `remote.<kind>.*.<hash>` keys.
pub fn hash_url(url: &str) -> String {
    hash64(url.trim().as_bytes()).to_hex()
}

/// Incremental signature builder.
///
/// Fields are length-prefixed before hashing so that `("ab", "c")` and
/// `("a", "bc")` produce different signatures.
#[derive(Debug, Default, Clone)]
pub struct SignatureBuilder {
    buf: Vec<u8>,
}

impl SignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, value: &str) -> Self {
        self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn number(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn finish(&self) -> String {
        hash64(&self.buf).to_hex()
    }
}
