mod hash;
mod normalizer;

pub use hash::{bloom_positions, fnv1a_64, hash_pair};
pub use normalizer::{NormalizerOptions, TermNormalizer};
