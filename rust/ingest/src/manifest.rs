//! Manifest publication: the single JSON document readers discover the
//! archive through. Written exactly once at finalize, never mutated.

use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_storage::Storage;
use tome_types::{Manifest, MANIFEST_FILE_NAME};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("storage error: {0}")]
    Put(#[from] tome_storage::PutError),
    #[error("storage error: {0}")]
    Get(#[from] tome_storage::GetError),
    #[error("corrupt manifest: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl TomeError for ManifestError {
    fn code(&self) -> ErrorCodes {
        match self {
            ManifestError::Corrupt(_) => ErrorCodes::DataLoss,
            _ => ErrorCodes::Internal,
        }
    }
}

pub async fn publish(storage: &Storage, manifest: &Manifest) -> Result<(), ManifestError> {
    let bytes = serde_json::to_vec_pretty(manifest)?;
    storage.put_bytes(MANIFEST_FILE_NAME, &bytes).await?;
    tracing::info!(
        total_articles = manifest.total_articles,
        data_files = manifest.data_files.len(),
        "published manifest"
    );
    Ok(())
}

pub async fn load(storage: &Storage) -> Result<Manifest, ManifestError> {
    Ok(serde_json::from_slice(&storage.get(MANIFEST_FILE_NAME).await?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tome_types::{IndexFiles, MANIFEST_VERSION};

    #[tokio::test]
    async fn publish_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            source_url: "file:///dump.xml.bz2".to_string(),
            total_articles: 0,
            articles_by_type: BTreeMap::new(),
            data_files: Vec::new(),
            index_files: IndexFiles::default(),
        };
        publish(&storage, &manifest).await.unwrap();
        let loaded = load(&storage).await.unwrap();
        assert_eq!(loaded, manifest);
    }
}
