pub mod cache;
pub mod config;

pub use cache::{Cache, EvictionListener, LruBoundedCache, UnboundedCache, Weighted};
pub use config::{CacheConfig, LruCacheConfig};

use std::hash::Hash;
use tome_config::Configurable;
use tome_error::TomeError;

pub async fn from_config<K, V>(config: &CacheConfig) -> Result<Cache<K, V>, Box<dyn TomeError>>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + Weighted + 'static,
{
    match config {
        CacheConfig::Unbounded => Ok(Cache::Unbounded(
            UnboundedCache::try_from_config(config).await?,
        )),
        CacheConfig::Lru(_) => Ok(Cache::Lru(LruBoundedCache::try_from_config(config).await?)),
    }
}
