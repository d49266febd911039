use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tome_config::Configurable;
use tome_error::TomeError;

use crate::config::{StorageConfig, StorageConfigError};

/// Object storage over a local directory root. Keys are `/`-separated
/// paths relative to the root.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> LocalStorage {
        LocalStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, std::io::Error> {
        tokio::fs::read(self.resolve(key)).await
    }

    /// Writes are atomic: bytes land in a sibling temp file which is then
    /// renamed over the key. A crashed writer never leaves a torn object.
    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), std::io::Error> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tracing::debug!(key, bytes = bytes.len(), "writing object");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.resolve(key)).await.unwrap_or(false)
    }

    pub async fn delete(&self, key: &str) -> Result<(), std::io::Error> {
        tokio::fs::remove_file(self.resolve(key)).await
    }

    /// Keys under `prefix`, relative to the root, in no particular order.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, std::io::Error> {
        let base = self.resolve(prefix);
        let mut keys = Vec::new();
        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    keys.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl Configurable<StorageConfig> for LocalStorage {
    async fn try_from_config(config: &StorageConfig) -> Result<Self, Box<dyn TomeError>> {
        match config {
            StorageConfig::Local(local_config) => Ok(LocalStorage::new(&local_config.root)),
            #[allow(unreachable_patterns)]
            _ => Err(Box::new(StorageConfigError::InvalidStorageConfig)),
        }
    }
}
