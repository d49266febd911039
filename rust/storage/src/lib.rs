pub mod config;
pub mod local;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tome_config::Configurable;
use tome_error::{ErrorCodes, TomeError};

use config::StorageConfig;
use local::LocalStorage;

#[derive(Clone, Debug)]
enum StorageKind {
    Local(LocalStorage),
}

/// The facade the writer, index builder, and readers go through. Owns the
/// output directory; keys are `/`-separated paths relative to the archive
/// root.
#[derive(Clone, Debug)]
pub struct Storage {
    kind: StorageKind,
}

#[derive(Error, Debug)]
pub enum GetError {
    #[error("No such key: {0}")]
    NoSuchKey(String),
    #[error("Local storage error: {0}")]
    LocalError(#[from] std::io::Error),
}

impl TomeError for GetError {
    fn code(&self) -> ErrorCodes {
        match self {
            GetError::NoSuchKey(_) => ErrorCodes::NotFound,
            GetError::LocalError(_) => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum PutError {
    #[error("Local storage error: {0}")]
    LocalError(#[from] std::io::Error),
}

impl TomeError for PutError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

impl Storage {
    pub fn new_local<P: AsRef<Path>>(root: P) -> Self {
        Storage {
            kind: StorageKind::Local(LocalStorage::new(root.as_ref())),
        }
    }

    /// The local root, when the backend has one. Consumers that hand paths
    /// to external readers (parquet, CLI output) use this.
    pub fn local_root(&self) -> Option<&Path> {
        match &self.kind {
            StorageKind::Local(local) => Some(local.root()),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, GetError> {
        match &self.kind {
            StorageKind::Local(local) => match local.get(key).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(GetError::NoSuchKey(key.to_string()))
                }
                Err(e) => Err(GetError::LocalError(e)),
            },
        }
    }

    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), PutError> {
        match &self.kind {
            StorageKind::Local(local) => Ok(local.put_bytes(key, bytes).await?),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match &self.kind {
            StorageKind::Local(local) => local.exists(key).await,
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), PutError> {
        match &self.kind {
            StorageKind::Local(local) => Ok(local.delete(key).await?),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, GetError> {
        match &self.kind {
            StorageKind::Local(local) => Ok(local.list(prefix).await?),
        }
    }
}

#[async_trait]
impl Configurable<StorageConfig> for Storage {
    async fn try_from_config(config: &StorageConfig) -> Result<Self, Box<dyn TomeError>> {
        match config {
            StorageConfig::Local(_) => Ok(Storage {
                kind: StorageKind::Local(LocalStorage::try_from_config(config).await?),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        storage
            .put_bytes("data/person/person.0.parquet", b"hello")
            .await
            .unwrap();
        let bytes = storage.get("data/person/person.0.parquet").await.unwrap();
        assert_eq!(bytes, b"hello");
        assert!(storage.exists("data/person/person.0.parquet").await);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        match storage.get("nope").await {
            Err(GetError::NoSuchKey(key)) => assert_eq!(key, "nope"),
            other => panic!("expected NoSuchKey, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn list_walks_nested_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        storage.put_bytes("indexes/bloom/a.json", b"{}").await.unwrap();
        storage.put_bytes("indexes/titles.json.gz", b"x").await.unwrap();
        let mut keys = storage.list("indexes").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["indexes/bloom/a.json", "indexes/titles.json.gz"]);
    }
}
