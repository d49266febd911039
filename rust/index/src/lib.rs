pub mod bloom;
pub mod fulltext;
pub mod geo;
pub mod hnsw;
pub mod ivfpq;
pub mod lookup;

pub use bloom::BloomFilter;
pub use hnsw::{HnswIndex, HnswIndexConfig, HybridStrategy, SearchOptions};
pub use ivfpq::{IvfPqConfig, IvfPqIndex, VectorFileMetadata};
pub use lookup::{EmbeddingLookupTable, LookupTableConfig};
