use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ArticleType;

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// One columnar output file within a type partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardFile {
    pub path: String,
    pub article_type: ArticleType,
    pub shard: u32,
    pub row_count: u64,
    pub size_bytes: u64,
    pub row_groups: u32,
}

/// Paths of the auxiliary index files, relative to the archive root.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFiles {
    pub titles: String,
    pub types: String,
    pub ids: String,
    pub bloom: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<String>,
}

/// The single JSON document describing a published archive.
///
/// Written exactly once at finalize and never mutated; readers discover
/// every other file transitively from here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub source_url: String,
    pub total_articles: u64,
    pub articles_by_type: BTreeMap<ArticleType, u64>,
    pub data_files: Vec<ShardFile>,
    pub index_files: IndexFiles,
}

impl Manifest {
    pub fn total_bytes(&self) -> u64 {
        self.data_files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn files_for_type(&self, article_type: ArticleType) -> Vec<&ShardFile> {
        self.data_files
            .iter()
            .filter(|f| f.article_type == article_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_through_json() {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            source_url: "file:///dump.xml.bz2".to_string(),
            total_articles: 2,
            articles_by_type: BTreeMap::from([
                (ArticleType::Person, 1),
                (ArticleType::Place, 1),
            ]),
            data_files: vec![ShardFile {
                path: "data/person/person.0.parquet".to_string(),
                article_type: ArticleType::Person,
                shard: 0,
                row_count: 1,
                size_bytes: 1024,
                row_groups: 1,
            }],
            index_files: IndexFiles::default(),
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.total_bytes(), 1024);
        assert_eq!(back.files_for_type(ArticleType::Person).len(), 1);
    }
}
