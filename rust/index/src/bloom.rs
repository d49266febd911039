//! Probabilistic set membership for the per-file archive indexes and the
//! embedding lookup table.
//!
//! Sizing follows the standard formulas: `m = ceil(-n·ln(p) / ln(2)^2)`
//! bits and `k = ceil((m/n)·ln(2))` probes. Probes are derived from an
//! FNV-1a base pair with double hashing; the bit array is plain `u64`
//! words so the persisted form is independent of any bit-vector library.

use base64::prelude::{Engine, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_normalize::bloom_positions;

#[derive(Error, Debug)]
pub enum BloomError {
    #[error("bit payload length {got} does not match bit_count {expected}")]
    LengthMismatch { expected: u64, got: usize },
    #[error("invalid base64 bit payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
}

impl TomeError for BloomError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::DataLoss
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BloomFilter {
    bit_count: u64,
    hash_count: u32,
    words: Vec<u64>,
}

/// Serialized form: bits packed little-endian into base64.
#[derive(Serialize, Deserialize)]
pub struct SerializedBloom {
    pub bit_count: u64,
    pub hash_count: u32,
    pub bits: String,
}

impl BloomFilter {
    /// Size for `expected_items` at `false_positive_rate`.
    pub fn with_capacity(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let hash_count = ((bit_count as f64 / n) * ln2).ceil().max(1.0) as u32;
        BloomFilter {
            bit_count,
            hash_count,
            words: vec![0; bit_count.div_ceil(64) as usize],
        }
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn insert(&mut self, item: &str) {
        for position in bloom_positions(item.as_bytes(), self.hash_count, self.bit_count) {
            self.words[(position / 64) as usize] |= 1u64 << (position % 64);
        }
    }

    /// False negatives never happen; false positives at roughly the
    /// configured rate.
    pub fn might_contain(&self, item: &str) -> bool {
        bloom_positions(item.as_bytes(), self.hash_count, self.bit_count)
            .into_iter()
            .all(|position| self.words[(position / 64) as usize] & (1u64 << (position % 64)) != 0)
    }

    pub fn to_serialized(&self) -> SerializedBloom {
        let mut bytes = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        SerializedBloom {
            bit_count: self.bit_count,
            hash_count: self.hash_count,
            bits: BASE64_STANDARD.encode(bytes),
        }
    }

    pub fn from_serialized(serialized: &SerializedBloom) -> Result<Self, BloomError> {
        let bytes = BASE64_STANDARD.decode(&serialized.bits)?;
        let expected_words = serialized.bit_count.div_ceil(64) as usize;
        if bytes.len() != expected_words * 8 {
            return Err(BloomError::LengthMismatch {
                expected: serialized.bit_count,
                got: bytes.len() * 8,
            });
        }
        let words = bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunks_exact(8)")))
            .collect();
        Ok(BloomFilter {
            bit_count: serialized.bit_count,
            hash_count: serialized.hash_count,
            words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sizing_matches_formulas() {
        // n=1000, p=0.01: m = ceil(1000 * 9.5851) = 9586, k = ceil(6.64) = 7.
        let bloom = BloomFilter::with_capacity(1000, 0.01);
        assert_eq!(bloom.bit_count(), 9586);
        assert_eq!(bloom.hash_count(), 7);
    }

    #[test]
    fn inserted_items_are_always_found() {
        let mut bloom = BloomFilter::with_capacity(100, 0.01);
        for i in 0..100 {
            bloom.insert(&format!("term-{i}"));
        }
        for i in 0..100 {
            assert!(bloom.might_contain(&format!("term-{i}")));
        }
    }

    #[test]
    fn false_positive_rate_stays_near_configured() {
        let p = 0.01;
        let mut bloom = BloomFilter::with_capacity(10_000, p);
        for i in 0..10_000 {
            bloom.insert(&format!("present-{i}"));
        }
        let mut false_positives = 0;
        let samples = 10_000;
        for i in 0..samples {
            if bloom.might_contain(&format!("absent-{i}")) {
                false_positives += 1;
            }
        }
        let observed = false_positives as f64 / samples as f64;
        assert!(observed <= 2.0 * p, "observed fp rate {observed} > {}", 2.0 * p);
    }

    #[test]
    fn serialization_round_trips() {
        let mut bloom = BloomFilter::with_capacity(50, 0.05);
        bloom.insert("tokyo");
        bloom.insert("einstein");
        let serialized = bloom.to_serialized();
        let restored = BloomFilter::from_serialized(&serialized).unwrap();
        assert_eq!(restored, bloom);
        assert!(restored.might_contain("tokyo"));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let mut serialized = BloomFilter::with_capacity(50, 0.05).to_serialized();
        serialized.bits = "AAAA".to_string();
        assert!(BloomFilter::from_serialized(&serialized).is_err());
    }

    proptest! {
        #[test]
        fn never_a_false_negative(items in proptest::collection::vec("[a-z]{1,12}", 1..50)) {
            let mut bloom = BloomFilter::with_capacity(items.len(), 0.01);
            for item in &items {
                bloom.insert(item);
            }
            for item in &items {
                prop_assert!(bloom.might_contain(item));
            }
        }
    }
}
