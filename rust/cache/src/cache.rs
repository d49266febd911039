use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use parking_lot::RwLock;
use thiserror::Error;
use tome_config::Configurable;
use tome_error::{ErrorCodes, TomeError};

use crate::config::CacheConfig;

/// Byte weight of a cached value, used against the cache's byte budget.
/// The default weight of 1 makes an entry-count-only cache behave like a
/// plain LRU.
pub trait Weighted {
    fn weight(&self) -> usize {
        1
    }
}

/// Invoked with each entry the bounded cache evicts to stay within budget.
/// Not invoked for explicit `remove` calls.
pub type EvictionListener<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

#[derive(Clone)]
pub enum Cache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + Weighted + 'static,
{
    Unbounded(UnboundedCache<K, V>),
    Lru(LruBoundedCache<K, V>),
}

impl<K, V> Cache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + Weighted + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        match config {
            CacheConfig::Unbounded => Cache::Unbounded(UnboundedCache::new()),
            CacheConfig::Lru(_) => Cache::Lru(LruBoundedCache::new(config)),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        match self {
            Cache::Unbounded(cache) => cache.insert(key, value),
            Cache::Lru(cache) => cache.insert(key, value),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        match self {
            Cache::Unbounded(cache) => cache.get(key),
            Cache::Lru(cache) => cache.get(key),
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        match self {
            Cache::Unbounded(cache) => cache.remove(key),
            Cache::Lru(cache) => cache.remove(key),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        match self {
            Cache::Unbounded(cache) => cache.contains(key),
            Cache::Lru(cache) => cache.contains(key),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Cache::Unbounded(cache) => cache.len(),
            Cache::Lru(cache) => cache.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self {
            Cache::Unbounded(cache) => cache.clear(),
            Cache::Lru(cache) => cache.clear(),
        }
    }

    /// Registers the eviction listener. Only the bounded variant evicts.
    pub fn set_eviction_listener(&self, listener: EvictionListener<K, V>) {
        if let Cache::Lru(cache) = self {
            cache.set_eviction_listener(listener);
        }
    }
}

#[derive(Clone)]
pub struct UnboundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + 'static,
{
    cache: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Default for UnboundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> UnboundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + 'static,
{
    pub fn new() -> Self {
        UnboundedCache {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.cache.write().insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.read().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.cache.write().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut write_guard = self.cache.write();
        write_guard.clear();
        write_guard.shrink_to_fit();
    }
}

struct LruBoundedInner<K: Hash + Eq, V> {
    cache: LruCache<K, V>,
    bytes: usize,
    max_bytes: Option<usize>,
    listener: Option<EvictionListener<K, V>>,
}

impl<K, V> LruBoundedInner<K, V>
where
    K: Hash + Eq,
    V: Weighted,
{
    fn notify(&self, key: &K, value: &V) {
        if let Some(listener) = &self.listener {
            listener(key, value);
        }
    }

    /// Evict least-recently-used entries until the byte budget holds.
    fn enforce_byte_budget(&mut self) {
        let Some(max_bytes) = self.max_bytes else {
            return;
        };
        while self.bytes > max_bytes && self.cache.len() > 1 {
            match self.cache.pop_lru() {
                Some((key, value)) => {
                    self.bytes = self.bytes.saturating_sub(value.weight());
                    self.notify(&key, &value);
                }
                None => break,
            }
        }
    }
}

/// An entry- and byte-bounded LRU. Evictions fire the registered listener
/// so owners holding ids into the cache can react; explicit removes do not.
#[derive(Clone)]
pub struct LruBoundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + Weighted + 'static,
{
    inner: Arc<Mutex<LruBoundedInner<K, V>>>,
}

impl<K, V> LruBoundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + Weighted + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        match config {
            CacheConfig::Lru(lru) => {
                let capacity = NonZeroUsize::new(lru.max_entries.max(1))
                    .expect("max(1) keeps the capacity non-zero");
                LruBoundedCache {
                    inner: Arc::new(Mutex::new(LruBoundedInner {
                        cache: LruCache::new(capacity),
                        bytes: 0,
                        max_bytes: lru.max_bytes,
                        listener: None,
                    })),
                }
            }
            CacheConfig::Unbounded => panic!("Invalid cache configuration"),
        }
    }

    pub fn set_eviction_listener(&self, listener: EvictionListener<K, V>) {
        self.inner.lock().listener = Some(listener);
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.bytes += value.weight();
        if let Some((old_key, old_value)) = inner.cache.push(key.clone(), value) {
            inner.bytes = inner.bytes.saturating_sub(old_value.weight());
            // push returns either the displaced value under the same key
            // (an overwrite, not an eviction) or the LRU victim.
            if old_key != key {
                inner.notify(&old_key, &old_value);
            }
        }
        inner.enforce_byte_budget();
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().cache.get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let removed = inner.cache.pop(key);
        if let Some(value) = &removed {
            inner.bytes = inner.bytes.saturating_sub(value.weight());
        }
        removed
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().cache.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.bytes = 0;
    }
}

#[async_trait]
impl<K, V> Configurable<CacheConfig> for UnboundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + 'static,
{
    async fn try_from_config(config: &CacheConfig) -> Result<Self, Box<dyn TomeError>> {
        match config {
            CacheConfig::Unbounded => Ok(UnboundedCache::new()),
            CacheConfig::Lru(_) => Err(Box::new(CacheConfigError::InvalidCacheConfig)),
        }
    }
}

#[async_trait]
impl<K, V> Configurable<CacheConfig> for LruBoundedCache<K, V>
where
    K: Send + Sync + Clone + Hash + Eq + 'static,
    V: Send + Sync + Clone + Weighted + 'static,
{
    async fn try_from_config(config: &CacheConfig) -> Result<Self, Box<dyn TomeError>> {
        match config {
            CacheConfig::Lru(_) => Ok(LruBoundedCache::new(config)),
            CacheConfig::Unbounded => Err(Box::new(CacheConfigError::InvalidCacheConfig)),
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheConfigError {
    #[error("Invalid cache config")]
    InvalidCacheConfig,
}

impl TomeError for CacheConfigError {
    fn code(&self) -> ErrorCodes {
        match self {
            CacheConfigError::InvalidCacheConfig => ErrorCodes::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LruCacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Blob(Vec<u8>);

    impl Weighted for Blob {
        fn weight(&self) -> usize {
            self.0.len()
        }
    }

    fn lru_config(max_entries: usize, max_bytes: Option<usize>) -> CacheConfig {
        CacheConfig::Lru(LruCacheConfig {
            max_entries,
            max_bytes,
        })
    }

    #[test]
    fn evicts_least_recently_used_at_entry_cap() {
        let cache: LruBoundedCache<u32, Blob> = LruBoundedCache::new(&lru_config(2, None));
        cache.insert(1, Blob(vec![0; 8]));
        cache.insert(2, Blob(vec![0; 8]));
        cache.get(&1);
        cache.insert(3, Blob(vec![0; 8]));
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn byte_budget_evicts_and_notifies() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let cache: LruBoundedCache<u32, Blob> = LruBoundedCache::new(&lru_config(100, Some(64)));
        let seen = evicted.clone();
        cache.set_eviction_listener(Arc::new(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        for i in 0..8 {
            cache.insert(i, Blob(vec![0; 16]));
        }
        assert!(cache.bytes() <= 64);
        assert!(evicted.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn overwrite_does_not_notify() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let cache: LruBoundedCache<u32, Blob> = LruBoundedCache::new(&lru_config(4, None));
        let seen = evicted.clone();
        cache.set_eviction_listener(Arc::new(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        cache.insert(1, Blob(vec![0; 8]));
        cache.insert(1, Blob(vec![0; 4]));
        assert_eq!(evicted.load(Ordering::SeqCst), 0);
        assert_eq!(cache.bytes(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_adjusts_bytes_without_notifying() {
        let cache: LruBoundedCache<u32, Blob> = LruBoundedCache::new(&lru_config(4, Some(1024)));
        cache.insert(1, Blob(vec![0; 10]));
        assert_eq!(cache.bytes(), 10);
        assert!(cache.remove(&1).is_some());
        assert_eq!(cache.bytes(), 0);
    }
}
