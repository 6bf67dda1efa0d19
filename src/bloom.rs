//! Probabilistic membership filter over content fingerprints.
//!
//! The filter backs the exact-duplicate fast path and rides along in
//! durable snapshots. False positives are acceptable; false negatives are
//! not. Similarity decisions never depend on it and stay on the vector
//! path.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

/// Smallest permitted bit count.
pub const MIN_BLOOM_BITS: usize = 64;
/// Largest permitted bit count (2^26).
pub const MAX_BLOOM_BITS: usize = 1 << 26;
/// Default bit count when the configuration does not override it.
pub const DEFAULT_BLOOM_BITS: usize = 8192;
/// Default number of hash functions.
pub const DEFAULT_BLOOM_HASHES: usize = 5;

/// Errors surfaced while restoring a filter from an exported snapshot.
#[derive(Debug, Error)]
pub enum BloomError {
    /// The snapshot encodes a filter of a different size.
    #[error("bloom import size mismatch: filter holds {expected} bytes, snapshot holds {actual}")]
    SizeMismatch {
        /// Byte length of this filter's bit array.
        expected: usize,
        /// Byte length carried by the snapshot.
        actual: usize,
    },
    /// The snapshot is not valid base64.
    #[error("bloom snapshot is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Bloom filter backed by a heap-allocated `u64` word array.
///
/// The bit count is configuration rather than a compile-time constant, so
/// the words live in a `Vec` sized at construction.
pub struct BloomFilter {
    words: Vec<u64>,
    bit_count: usize,
    hashes: usize,
}

impl BloomFilter {
    /// Constructs an empty filter with `bits` bits and `hashes` hash
    /// functions. Out-of-range values are clamped into the supported
    /// ranges rather than rejected; configuration-level validation is the
    /// caller's concern.
    pub fn new(bits: usize, hashes: usize) -> Self {
        let bit_count = bits.clamp(MIN_BLOOM_BITS, MAX_BLOOM_BITS);
        let words = vec![0u64; bit_count.div_ceil(64)];
        Self {
            words,
            bit_count,
            hashes: hashes.max(1),
        }
    }

    /// Number of bits tracked by the filter.
    pub fn bit_size(&self) -> usize {
        self.bit_count
    }

    /// Number of hash functions applied per value.
    pub fn hash_count(&self) -> usize {
        self.hashes
    }

    /// Sets the `hashes` bits derived from `value`.
    pub fn add(&mut self, value: &str) {
        for round in 0..self.hashes {
            let idx = self.bit_index(value, round);
            self.words[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    /// Whether every bit derived from `value` is set. A `true` answer may
    /// be a false positive; `false` is definitive.
    pub fn might_contain(&self, value: &str) -> bool {
        (0..self.hashes).all(|round| {
            let idx = self.bit_index(value, round);
            self.words[idx / 64] & (1u64 << (idx % 64)) != 0
        })
    }

    /// Base64 export of the raw bit array (little-endian words).
    pub fn export(&self) -> String {
        let mut bytes = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        BASE64.encode(bytes)
    }

    /// Replaces the bit array with a previously exported one. Fails when
    /// the decoded payload does not match this filter's size exactly.
    pub fn import(&mut self, encoded: &str) -> Result<(), BloomError> {
        let bytes = BASE64.decode(encoded)?;
        let expected = self.words.len() * 8;
        if bytes.len() != expected {
            return Err(BloomError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        for (word, chunk) in self.words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw);
        }
        Ok(())
    }

    fn bit_index(&self, value: &str, round: usize) -> usize {
        (seeded_hash(value.as_bytes(), round as u64 + 1) as usize) % self.bit_count
    }
}

/// Polynomial rolling hash seeded by the hash-function index. Deterministic
/// across runs and platforms, which keeps exported snapshots portable.
fn seeded_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed.wrapping_mul(0x9e37_79b1_85eb_ca87) ^ data.len() as u64;
    for &byte in data {
        hash ^= (byte as u64).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    hash ^ (hash >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_values_are_contained() {
        let mut bloom = BloomFilter::new(DEFAULT_BLOOM_BITS, DEFAULT_BLOOM_HASHES);
        let values = ["alpha", "beta", "gamma", ""];
        for value in values {
            bloom.add(value);
        }
        for value in values {
            assert!(bloom.might_contain(value));
        }
    }

    #[test]
    fn unseen_value_is_rejected() {
        let mut bloom = BloomFilter::new(DEFAULT_BLOOM_BITS, DEFAULT_BLOOM_HASHES);
        bloom.add("alpha");
        bloom.add("beta");
        assert!(!bloom.might_contain("something entirely different"));
    }

    #[test]
    fn export_import_round_trip_is_byte_equal() {
        let mut original = BloomFilter::new(1024, 3);
        for value in ["one", "two", "three"] {
            original.add(value);
        }
        let exported = original.export();

        let mut restored = BloomFilter::new(1024, 3);
        restored.import(&exported).expect("import");
        assert_eq!(restored.export(), exported);
        for value in ["one", "two", "three"] {
            assert!(restored.might_contain(value));
        }
    }

    #[test]
    fn import_rejects_size_mismatch() {
        let small = BloomFilter::new(64, 3);
        let mut large = BloomFilter::new(4096, 3);
        match large.import(&small.export()) {
            Err(BloomError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, 4096 / 8);
                assert_eq!(actual, 64 / 8);
            }
            other => panic!("expected size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn hashing_is_deterministic_across_instances() {
        let mut a = BloomFilter::new(2048, 4);
        let mut b = BloomFilter::new(2048, 4);
        a.add("deterministic");
        b.add("deterministic");
        assert_eq!(a.export(), b.export());
    }

    #[test]
    fn sizes_are_clamped_into_range() {
        let tiny = BloomFilter::new(1, 0);
        assert_eq!(tiny.bit_size(), MIN_BLOOM_BITS);
        assert_eq!(tiny.hash_count(), 1);
        let huge = BloomFilter::new(usize::MAX, 2);
        assert_eq!(huge.bit_size(), MAX_BLOOM_BITS);
    }
}
