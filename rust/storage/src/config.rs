use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    pub root: String,
}

/// Which backend the archive root lives on. The facade keeps the same
/// get/put surface for every backend so callers never branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    Local(LocalStorageConfig),
}

#[derive(Error, Debug)]
pub enum StorageConfigError {
    #[error("Invalid storage config")]
    InvalidStorageConfig,
}

impl TomeError for StorageConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}
