//! Atomic checkpoint persistence for restart-after-interruption.

use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_storage::Storage;
use tome_types::{Checkpoint, CHECKPOINT_FILE_NAME};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("storage error: {0}")]
    Put(#[from] tome_storage::PutError),
    #[error("storage error: {0}")]
    Get(#[from] tome_storage::GetError),
    #[error("corrupt checkpoint: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl TomeError for CheckpointError {
    fn code(&self) -> ErrorCodes {
        match self {
            CheckpointError::Corrupt(_) => ErrorCodes::DataLoss,
            _ => ErrorCodes::Internal,
        }
    }
}

/// Load the checkpoint if one exists and it matches the dump being
/// ingested. A checkpoint for a different dump is ignored, not an error.
pub async fn load(storage: &Storage, dump_url: &str) -> Result<Option<Checkpoint>, CheckpointError> {
    match storage.get(CHECKPOINT_FILE_NAME).await {
        Ok(bytes) => {
            let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
            if checkpoint.matches_source(dump_url) {
                Ok(Some(checkpoint))
            } else {
                tracing::warn!(
                    checkpointed = %checkpoint.dump_url,
                    requested = %dump_url,
                    "ignoring checkpoint for a different dump"
                );
                Ok(None)
            }
        }
        Err(tome_storage::GetError::NoSuchKey(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The storage layer writes through a temp file and rename, so a crash
/// mid-save never leaves a torn checkpoint.
pub async fn save(storage: &Storage, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    let bytes = serde_json::to_vec_pretty(checkpoint)?;
    storage.put_bytes(CHECKPOINT_FILE_NAME, &bytes).await?;
    Ok(())
}

pub async fn clear(storage: &Storage) -> Result<(), CheckpointError> {
    if storage.exists(CHECKPOINT_FILE_NAME).await {
        storage.delete(CHECKPOINT_FILE_NAME).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn checkpoint(dump_url: &str, last_id: u64) -> Checkpoint {
        Checkpoint {
            dump_url: dump_url.to_string(),
            articles_processed: last_id,
            last_article_id: last_id,
            last_article_title: format!("Article {last_id}"),
            articles_by_type: BTreeMap::new(),
            bytes_downloaded: 0,
            started_at: Utc::now(),
            checkpointed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        assert!(load(&storage, "u").await.unwrap().is_none());
        save(&storage, &checkpoint("u", 42)).await.unwrap();
        let loaded = load(&storage, "u").await.unwrap().unwrap();
        assert_eq!(loaded.last_article_id, 42);
    }

    #[tokio::test]
    async fn mismatched_dump_url_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        save(&storage, &checkpoint("dump-a", 10)).await.unwrap();
        assert!(load(&storage, "dump-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        save(&storage, &checkpoint("u", 1)).await.unwrap();
        clear(&storage).await.unwrap();
        assert!(load(&storage, "u").await.unwrap().is_none());
    }
}
