//! Client for the external embedding inference service.
//!
//! The service exposes `POST /embeddings` taking `{model, texts}` and
//! returning `{embeddings, cached}` per batch. The client batches, retries
//! transient failures with exponential backoff, and deduplicates repeat
//! texts through an in-process cache keyed by `(model, sha256(text))`.

mod client;

pub use client::{CacheStats, EmbedRequest, EmbedResponse, EmbeddingClient, EmbeddingClientConfig};

use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("embedding service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("expected {expected} embeddings, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("model {model} returned dimension {got}, expected {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        got: usize,
    },
}

impl EmbeddingError {
    /// 429 and 5xx responses (and transport errors) are retried; other
    /// API failures are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            EmbeddingError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl TomeError for EmbeddingError {
    fn code(&self) -> ErrorCodes {
        match self {
            EmbeddingError::Reqwest(_) => ErrorCodes::Unavailable,
            EmbeddingError::Api { status, .. } if *status == 429 => ErrorCodes::ResourceExhausted,
            EmbeddingError::Api { .. } => ErrorCodes::Unavailable,
            EmbeddingError::LengthMismatch { .. } | EmbeddingError::DimensionMismatch { .. } => {
                ErrorCodes::Internal
            }
        }
    }
}
