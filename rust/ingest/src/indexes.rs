//! Archive lookup indexes built alongside the shard writer.
//!
//! Per written file: a bloom filter over normalized titles. After
//! finalize: gzip'd JSON maps for titles, types, and ids. The read path
//! follows the documented lookup order: normalize, consult the per-file
//! blooms, and only then the title map, which resolves false positives.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_index::bloom::{BloomFilter, SerializedBloom};
use tome_normalize::TermNormalizer;
use tome_storage::Storage;
use tome_types::{ArticleType, IndexFiles};

use crate::writer::WrittenFile;

pub const TITLES_KEY: &str = "indexes/titles.json.gz";
pub const TYPES_KEY: &str = "indexes/types.json.gz";
pub const IDS_KEY: &str = "indexes/ids.json.gz";
pub const BLOOM_PREFIX: &str = "indexes/bloom";

#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error("storage error: {0}")]
    Put(#[from] tome_storage::PutError),
    #[error("storage error: {0}")]
    Get(#[from] tome_storage::GetError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt index file: {0}")]
    Corrupt(String),
}

impl TomeError for IndexBuildError {
    fn code(&self) -> ErrorCodes {
        match self {
            IndexBuildError::Corrupt(_) => ErrorCodes::DataLoss,
            _ => ErrorCodes::Internal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TitleLocation {
    pub file: String,
    pub row_group: u32,
    pub row: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdLocation {
    #[serde(rename = "type")]
    pub article_type: ArticleType,
    pub file: String,
    pub row_group: u32,
    pub row: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexBuilderConfig {
    #[serde(default = "IndexBuilderConfig::default_bloom_fp_rate")]
    pub bloom_fp_rate: f64,
}

impl IndexBuilderConfig {
    fn default_bloom_fp_rate() -> f64 {
        0.01
    }
}

impl Default for IndexBuilderConfig {
    fn default() -> Self {
        IndexBuilderConfig {
            bloom_fp_rate: Self::default_bloom_fp_rate(),
        }
    }
}

pub fn sanitize_file_name(path: &str) -> String {
    path.replace(['/', '\\'], "_")
}

pub fn bloom_key(file_path: &str) -> String {
    format!("{BLOOM_PREFIX}/{}.json", sanitize_file_name(file_path))
}

/// Accumulates lookup structures as files close; persisted at finalize.
pub struct ArchiveIndexBuilder {
    config: IndexBuilderConfig,
    normalizer: TermNormalizer,
    titles: BTreeMap<String, TitleLocation>,
    ids: BTreeMap<String, IdLocation>,
    types: BTreeMap<ArticleType, BTreeSet<String>>,
    blooms: Vec<(String, BloomFilter)>,
}

impl Default for ArchiveIndexBuilder {
    fn default() -> Self {
        Self::new(IndexBuilderConfig::default())
    }
}

impl ArchiveIndexBuilder {
    pub fn new(config: IndexBuilderConfig) -> Self {
        ArchiveIndexBuilder {
            config,
            normalizer: TermNormalizer::default(),
            titles: BTreeMap::new(),
            ids: BTreeMap::new(),
            types: BTreeMap::new(),
            blooms: Vec::new(),
        }
    }

    /// Resume from previously published indexes so a restarted ingest
    /// extends them instead of clobbering them.
    pub async fn resume(
        config: IndexBuilderConfig,
        storage: &Storage,
        prior_files: &[tome_types::ShardFile],
    ) -> Result<Self, IndexBuildError> {
        let mut builder = Self::new(config);
        if prior_files.is_empty() {
            return Ok(builder);
        }
        builder.titles = gunzip_json(&storage.get(TITLES_KEY).await?)?;
        builder.ids = gunzip_json(&storage.get(IDS_KEY).await?)?;
        for file in prior_files {
            builder
                .types
                .entry(file.article_type)
                .or_default()
                .insert(file.path.clone());
            let serialized: SerializedBloom =
                serde_json::from_slice(&storage.get(&bloom_key(&file.path)).await?)?;
            let bloom = BloomFilter::from_serialized(&serialized)
                .map_err(|e| IndexBuildError::Corrupt(e.to_string()))?;
            builder.blooms.push((file.path.clone(), bloom));
        }
        Ok(builder)
    }

    pub fn add_file(&mut self, written: &WrittenFile) {
        let mut bloom =
            BloomFilter::with_capacity(written.rows.len().max(1), self.config.bloom_fp_rate);
        for row in &written.rows {
            let normalized = self.normalizer.normalize(&row.title);
            bloom.insert(&normalized);
            self.titles.insert(
                normalized,
                TitleLocation {
                    file: written.file.path.clone(),
                    row_group: row.row_group,
                    row: row.row,
                },
            );
            self.ids.insert(
                row.id.clone(),
                IdLocation {
                    article_type: written.file.article_type,
                    file: written.file.path.clone(),
                    row_group: row.row_group,
                    row: row.row,
                },
            );
        }
        self.types
            .entry(written.file.article_type)
            .or_default()
            .insert(written.file.path.clone());
        self.blooms.push((written.file.path.clone(), bloom));
    }

    /// Write the four index artifacts and return their manifest entry.
    pub async fn finalize(&self, storage: &Storage) -> Result<IndexFiles, IndexBuildError> {
        storage
            .put_bytes(TITLES_KEY, &gzip_json(&self.titles)?)
            .await?;
        let types_by_name: BTreeMap<&str, &BTreeSet<String>> = self
            .types
            .iter()
            .map(|(t, files)| (t.as_str(), files))
            .collect();
        storage
            .put_bytes(TYPES_KEY, &gzip_json(&types_by_name)?)
            .await?;
        storage.put_bytes(IDS_KEY, &gzip_json(&self.ids)?).await?;

        let mut bloom_keys = Vec::with_capacity(self.blooms.len());
        for (file_path, bloom) in &self.blooms {
            let key = bloom_key(file_path);
            storage
                .put_bytes(&key, &serde_json::to_vec_pretty(&bloom.to_serialized())?)
                .await?;
            bloom_keys.push(key);
        }

        Ok(IndexFiles {
            titles: TITLES_KEY.to_string(),
            types: TYPES_KEY.to_string(),
            ids: IDS_KEY.to_string(),
            bloom: bloom_keys,
            lookup_table: None,
            vectors: None,
        })
    }
}

fn gzip_json<T: Serialize>(value: &T) -> Result<Vec<u8>, IndexBuildError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn gunzip_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, IndexBuildError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// The read side of the archive indexes: normalize, bloom, then map.
pub struct ArchiveIndexReader {
    normalizer: TermNormalizer,
    titles: BTreeMap<String, TitleLocation>,
    ids: BTreeMap<String, IdLocation>,
    types: BTreeMap<String, BTreeSet<String>>,
    blooms: Vec<BloomFilter>,
}

impl ArchiveIndexReader {
    pub async fn open(storage: &Storage) -> Result<Self, IndexBuildError> {
        let titles = gunzip_json(&storage.get(TITLES_KEY).await?)?;
        let ids = gunzip_json(&storage.get(IDS_KEY).await?)?;
        let types = gunzip_json(&storage.get(TYPES_KEY).await?)?;
        let mut blooms = Vec::new();
        for key in storage.list(BLOOM_PREFIX).await? {
            let serialized: SerializedBloom = serde_json::from_slice(&storage.get(&key).await?)
                .map_err(|e| IndexBuildError::Corrupt(format!("{key}: {e}")))?;
            let bloom = BloomFilter::from_serialized(&serialized)
                .map_err(|e| IndexBuildError::Corrupt(format!("{key}: {e}")))?;
            blooms.push(bloom);
        }
        Ok(ArchiveIndexReader {
            normalizer: TermNormalizer::default(),
            titles,
            ids,
            types,
            blooms,
        })
    }

    /// Bloom-gated title lookup. A miss in every bloom is authoritative;
    /// a hit is confirmed against the titles map.
    pub fn lookup_title(&self, title: &str) -> Option<&TitleLocation> {
        let normalized = self.normalizer.normalize(title);
        let might_exist = self.blooms.is_empty()
            || self.blooms.iter().any(|b| b.might_contain(&normalized));
        if !might_exist {
            return None;
        }
        self.titles.get(&normalized)
    }

    pub fn lookup_id(&self, id: &str) -> Option<&IdLocation> {
        self.ids.get(id)
    }

    pub fn files_for_type(&self, article_type: ArticleType) -> Vec<&str> {
        self.types
            .get(article_type.as_str())
            .map(|files| files.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn title_count(&self) -> usize {
        self.titles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::RowLocation;
    use tome_types::ShardFile;

    fn written_file() -> WrittenFile {
        WrittenFile {
            file: ShardFile {
                path: "data/person/person.0.parquet".to_string(),
                article_type: ArticleType::Person,
                shard: 0,
                row_count: 2,
                size_bytes: 1024,
                row_groups: 1,
            },
            rows: vec![
                RowLocation {
                    id: "736".to_string(),
                    title: "Albert Einstein".to_string(),
                    row_group: 0,
                    row: 0,
                },
                RowLocation {
                    id: "737".to_string(),
                    title: "Marie Curie".to_string(),
                    row_group: 0,
                    row: 1,
                },
            ],
        }
    }

    #[tokio::test]
    async fn build_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        let mut builder = ArchiveIndexBuilder::default();
        builder.add_file(&written_file());
        let index_files = builder.finalize(&storage).await.unwrap();
        assert_eq!(index_files.titles, TITLES_KEY);
        assert_eq!(index_files.bloom.len(), 1);
        assert!(
            storage
                .exists("indexes/bloom/data_person_person.0.parquet.json")
                .await
        );

        let reader = ArchiveIndexReader::open(&storage).await.unwrap();
        let location = reader.lookup_title("albert EINSTEIN").unwrap();
        assert_eq!(location.file, "data/person/person.0.parquet");
        assert_eq!(location.row, 0);
        assert!(reader.lookup_title("Nikola Tesla").is_none());
        assert_eq!(reader.lookup_id("737").unwrap().row, 1);
        assert_eq!(
            reader.files_for_type(ArticleType::Person),
            vec!["data/person/person.0.parquet"]
        );
        assert!(reader.files_for_type(ArticleType::Work).is_empty());
    }

    #[tokio::test]
    async fn empty_archive_still_emits_index_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new_local(dir.path());
        let builder = ArchiveIndexBuilder::default();
        let index_files = builder.finalize(&storage).await.unwrap();
        assert!(index_files.bloom.is_empty());
        let reader = ArchiveIndexReader::open(&storage).await.unwrap();
        assert_eq!(reader.title_count(), 0);
        assert!(reader.lookup_title("anything").is_none());
    }
}
