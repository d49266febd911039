use serde::{Deserialize, Serialize};

/// Entry and byte budgets for the bounded cache. A `max_bytes` of `None`
/// bounds by entry count only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LruCacheConfig {
    pub max_entries: usize,
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheConfig {
    Unbounded,
    Lru(LruCacheConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Lru(LruCacheConfig {
            max_entries: 10_000,
            max_bytes: None,
        })
    }
}
