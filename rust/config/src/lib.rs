pub mod helpers;

use async_trait::async_trait;
use thiserror::Error;
use tome_error::TomeError;

/// # Description
/// A trait for configuring a struct from a config object.
/// # Notes
/// Components that need to be constructed from deserialized configuration
/// should implement this trait rather than exposing ad-hoc constructors.
#[async_trait]
pub trait Configurable<T, E = Box<dyn TomeError>> {
    async fn try_from_config(config: &T) -> Result<Self, E>
    where
        Self: Sized;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    ConfigError(#[from] figment::Error),
}

impl TomeError for ConfigError {
    fn code(&self) -> tome_error::ErrorCodes {
        tome_error::ErrorCodes::Internal
    }
}
