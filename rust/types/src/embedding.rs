use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

/// Embedding models served by the external inference service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingModel {
    BgeM3,
    Gemma,
    Gemma300,
}

impl EmbeddingModel {
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingModel::BgeM3 => 1024,
            EmbeddingModel::Gemma | EmbeddingModel::Gemma300 => 768,
        }
    }

    /// Model identifier on the wire.
    pub fn api_name(&self) -> &'static str {
        match self {
            EmbeddingModel::BgeM3 => "bge-m3",
            EmbeddingModel::Gemma => "gemma",
            EmbeddingModel::Gemma300 => "gemma300",
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_name())
    }
}

#[derive(Error, Debug)]
#[error("unknown embedding model: {0}")]
pub struct UnknownEmbeddingModel(String);

impl TomeError for UnknownEmbeddingModel {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl FromStr for EmbeddingModel {
    type Err = UnknownEmbeddingModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bge-m3" | "m3" => Ok(EmbeddingModel::BgeM3),
            "gemma" => Ok(EmbeddingModel::Gemma),
            "gemma300" => Ok(EmbeddingModel::Gemma300),
            _ => Err(UnknownEmbeddingModel(s.to_string())),
        }
    }
}

/// Where a lookup-table term came from. Order is the dedup tie-break
/// priority: when the same normalized term arrives from several sources,
/// the highest-priority source wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermSource {
    Title,
    Entity,
    Category,
    Query,
}

impl TermSource {
    pub fn priority(&self) -> u8 {
        match self {
            TermSource::Title => 3,
            TermSource::Entity => 2,
            TermSource::Category => 1,
            TermSource::Query => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TermSource::Title => "title",
            TermSource::Entity => "entity",
            TermSource::Category => "category",
            TermSource::Query => "query",
        }
    }
}

impl FromStr for TermSource {
    type Err = UnknownEmbeddingModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(TermSource::Title),
            "entity" => Ok(TermSource::Entity),
            "category" => Ok(TermSource::Category),
            "query" => Ok(TermSource::Query),
            _ => Err(UnknownEmbeddingModel(s.to_string())),
        }
    }
}

/// One entry of the embedding lookup table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingLookup {
    pub term: String,
    pub term_hash: u64,
    pub embedding_m3: Vec<f32>,
    pub embedding_gemma: Option<Vec<f32>>,
    pub source: TermSource,
    pub hit_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_dimensions() {
        assert_eq!(EmbeddingModel::BgeM3.dimension(), 1024);
        assert_eq!(EmbeddingModel::Gemma.dimension(), 768);
        assert_eq!("bge-m3".parse::<EmbeddingModel>().unwrap(), EmbeddingModel::BgeM3);
    }

    #[test]
    fn source_priority_orders_title_first() {
        assert!(TermSource::Title.priority() > TermSource::Entity.priority());
        assert!(TermSource::Entity.priority() > TermSource::Category.priority());
        assert!(TermSource::Category.priority() > TermSource::Query.priority());
    }
}
