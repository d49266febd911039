use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

use crate::ArticleType;

/// A scalar value inside the infobox map column.
///
/// The infobox is stored as a dynamic map with a curated set of keys
/// promoted ("shredded") into first-class parquet columns at write time.
/// Dates stay strings to preserve the dump's original formatting;
/// `population` is lifted to an integer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoboxValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl InfoboxValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoboxValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            InfoboxValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// The storage-facing article row.
///
/// Invariants:
/// - `id` is unique within the archive.
/// - `coords_lat` and `coords_lon` are both present or both absent.
/// - `description` is the first paragraph, truncated to 500 characters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub article_type: ArticleType,
    pub title: String,
    pub description: String,
    pub wikidata_id: Option<String>,
    pub coords_lat: Option<f32>,
    pub coords_lon: Option<f32>,
    pub infobox: Option<BTreeMap<String, InfoboxValue>>,
    pub content: String,
    pub updated_at: DateTime<Utc>,
    /// Attached by the pipeline when embedding generation is enabled; not a
    /// parquet column (vectors are published through the vector index file).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum RecordValidationError {
    #[error("record {0}: coords_lat and coords_lon must both be set or both be null")]
    MismatchedCoords(String),
    #[error("record {0}: empty id")]
    EmptyId(String),
}

impl TomeError for RecordValidationError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl ArticleRecord {
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.id.is_empty() {
            return Err(RecordValidationError::EmptyId(self.title.clone()));
        }
        if self.coords_lat.is_some() != self.coords_lon.is_some() {
            return Err(RecordValidationError::MismatchedCoords(self.id.clone()));
        }
        Ok(())
    }

    pub fn coords(&self) -> Option<(f32, f32)> {
        match (self.coords_lat, self.coords_lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Truncate to the description budget on a char boundary.
pub fn truncate_description(paragraph: &str) -> String {
    if paragraph.chars().count() <= MAX_DESCRIPTION_CHARS {
        return paragraph.to_string();
    }
    paragraph.chars().take(MAX_DESCRIPTION_CHARS).collect()
}
