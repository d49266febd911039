//! Embedding lookup table: normalized term -> dense embeddings, fronted by
//! a bloom filter and an LRU of hot entries.
//!
//! The persisted form is a parquet file whose term column is sorted (the
//! on-disk reader binary-searches it) with statistics enabled for
//! query-time skipping, plus a separately-serialized bloom sidecar.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_cache::{CacheConfig, LruBoundedCache, LruCacheConfig, Weighted};
use tome_error::{ErrorCodes, TomeError};
use tome_normalize::{NormalizerOptions, TermNormalizer};
use tome_types::{EmbeddingLookup, TermSource};

use crate::bloom::{BloomFilter, SerializedBloom};

const COLUMN_TERM: &str = "term";
const COLUMN_TERM_HASH: &str = "term_hash";
const COLUMN_EMBEDDING_M3: &str = "embedding_m3";
const COLUMN_EMBEDDING_GEMMA: &str = "embedding_gemma";
const COLUMN_SOURCE: &str = "source";
const COLUMN_HIT_COUNT: &str = "hit_count";

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("bloom sidecar error: {0}")]
    Bloom(#[from] serde_json::Error),
    #[error("corrupt lookup table: {0}")]
    Corrupt(String),
}

impl TomeError for LookupError {
    fn code(&self) -> ErrorCodes {
        match self {
            LookupError::Io(_) => ErrorCodes::Internal,
            _ => ErrorCodes::DataLoss,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupTableConfig {
    #[serde(default = "LookupTableConfig::default_bloom_expected_items")]
    pub bloom_expected_items: usize,
    #[serde(default = "LookupTableConfig::default_bloom_fp_rate")]
    pub bloom_fp_rate: f64,
    /// Entry bound of the hot LRU.
    #[serde(default = "LookupTableConfig::default_memory_cache_size")]
    pub memory_cache_size: usize,
    #[serde(default = "LookupTableConfig::default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "LookupTableConfig::default_m3_dimension")]
    pub m3_dimension: usize,
    #[serde(default = "LookupTableConfig::default_gemma_dimension")]
    pub gemma_dimension: usize,
    #[serde(default)]
    pub normalizer: NormalizerOptions,
}

impl LookupTableConfig {
    fn default_bloom_expected_items() -> usize {
        100_000
    }

    fn default_bloom_fp_rate() -> f64 {
        0.01
    }

    fn default_memory_cache_size() -> usize {
        10_000
    }

    fn default_fuzzy_threshold() -> f64 {
        0.85
    }

    fn default_m3_dimension() -> usize {
        1024
    }

    fn default_gemma_dimension() -> usize {
        768
    }
}

impl Default for LookupTableConfig {
    fn default() -> Self {
        LookupTableConfig {
            bloom_expected_items: Self::default_bloom_expected_items(),
            bloom_fp_rate: Self::default_bloom_fp_rate(),
            memory_cache_size: Self::default_memory_cache_size(),
            fuzzy_threshold: Self::default_fuzzy_threshold(),
            m3_dimension: Self::default_m3_dimension(),
            gemma_dimension: Self::default_gemma_dimension(),
            normalizer: NormalizerOptions::default(),
        }
    }
}

impl Weighted for EmbeddingLookup {
    fn weight(&self) -> usize {
        self.term.len()
            + 4 * self.embedding_m3.len()
            + self.embedding_gemma.as_ref().map(|e| 4 * e.len()).unwrap_or(0)
            + 32
    }
}

pub struct EmbeddingLookupTable {
    config: LookupTableConfig,
    normalizer: TermNormalizer,
    entries: HashMap<String, EmbeddingLookup>,
    /// Rebuilt lazily; empty means stale when `entries` is non-empty.
    sorted_terms: Vec<String>,
    bloom: BloomFilter,
    hot: LruBoundedCache<String, EmbeddingLookup>,
}

impl EmbeddingLookupTable {
    pub fn new(config: LookupTableConfig) -> Self {
        let bloom = BloomFilter::with_capacity(config.bloom_expected_items, config.bloom_fp_rate);
        let hot = LruBoundedCache::new(&CacheConfig::Lru(LruCacheConfig {
            max_entries: config.memory_cache_size,
            max_bytes: None,
        }));
        let normalizer = TermNormalizer::new(config.normalizer.clone());
        EmbeddingLookupTable {
            config,
            normalizer,
            entries: HashMap::new(),
            sorted_terms: Vec::new(),
            bloom,
            hot,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn normalizer(&self) -> &TermNormalizer {
        &self.normalizer
    }

    /// Insert, deduplicating by normalized form with source priority
    /// (title > entity > category > query). A lower-priority arrival never
    /// displaces a higher-priority entry.
    pub fn insert(
        &mut self,
        raw_term: &str,
        embedding_m3: Vec<f32>,
        embedding_gemma: Option<Vec<f32>>,
        source: TermSource,
    ) -> bool {
        let term = self.normalizer.normalize(raw_term);
        if term.is_empty() {
            return false;
        }
        if let Some(existing) = self.entries.get(&term) {
            if existing.source.priority() >= source.priority() {
                return false;
            }
        }
        let entry = EmbeddingLookup {
            term_hash: tome_normalize::fnv1a_64(term.as_bytes()),
            term: term.clone(),
            embedding_m3,
            embedding_gemma,
            source,
            hit_count: 0,
        };
        self.bloom.insert(&term);
        self.hot.remove(&term);
        self.entries.insert(term, entry);
        self.sorted_terms.clear();
        true
    }

    /// Exact lookup: LRU, then bloom (a negative is authoritative), then
    /// the backing map. Hits bump `hit_count` and promote into the LRU.
    pub fn lookup(&mut self, raw_term: &str) -> Option<EmbeddingLookup> {
        let term = self.normalizer.normalize(raw_term);
        if let Some(hit) = self.hot.get(&term) {
            if let Some(entry) = self.entries.get_mut(&term) {
                entry.hit_count += 1;
            }
            return Some(hit);
        }
        if !self.bloom.might_contain(&term) {
            return None;
        }
        let entry = self.entries.get_mut(&term)?;
        entry.hit_count += 1;
        let entry = entry.clone();
        self.hot.insert(term, entry.clone());
        Some(entry)
    }

    fn ensure_sorted(&mut self) {
        if self.sorted_terms.len() != self.entries.len() {
            self.sorted_terms = self.entries.keys().cloned().collect();
            self.sorted_terms.sort();
        }
    }

    /// Exact match first; otherwise candidates sharing the first three
    /// normalized characters, scored by Jaro-Winkler, best first.
    pub fn fuzzy_lookup(&mut self, raw_term: &str, limit: usize) -> Vec<(EmbeddingLookup, f64)> {
        let term = self.normalizer.normalize(raw_term);
        if let Some(exact) = self.lookup(raw_term) {
            return vec![(exact, 1.0)];
        }
        self.ensure_sorted();
        let prefix: String = term.chars().take(3).collect();
        if prefix.is_empty() {
            return Vec::new();
        }
        let start = self
            .sorted_terms
            .partition_point(|t| t.as_str() < prefix.as_str());
        let mut scored: Vec<(String, f64)> = self.sorted_terms[start..]
            .iter()
            .take_while(|t| t.starts_with(&prefix))
            .map(|candidate| (candidate.clone(), strsim::jaro_winkler(&term, candidate)))
            .filter(|(_, score)| *score >= self.config.fuzzy_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        scored
            .into_iter()
            .filter_map(|(candidate, score)| {
                self.entries.get(&candidate).map(|e| (e.clone(), score))
            })
            .collect()
    }

    pub fn bloom_serialized(&self) -> SerializedBloom {
        self.bloom.to_serialized()
    }

    fn bloom_sidecar_path(path: &Path) -> PathBuf {
        path.with_extension("bloom.json")
    }

    /// Persist as a sorted parquet file plus the bloom sidecar.
    pub fn save(&mut self, path: &Path) -> Result<(), LookupError> {
        self.ensure_sorted();
        let m3_dim = self
            .entries
            .values()
            .next()
            .map(|e| e.embedding_m3.len())
            .unwrap_or(self.config.m3_dimension)
            .max(1);
        let gemma_dim = self
            .entries
            .values()
            .find_map(|e| e.embedding_gemma.as_ref().map(|g| g.len()))
            .unwrap_or(self.config.gemma_dimension)
            .max(1);

        let schema = Arc::new(Schema::new(vec![
            Field::new(COLUMN_TERM, DataType::Utf8, false),
            Field::new(COLUMN_TERM_HASH, DataType::UInt64, false),
            Field::new(
                COLUMN_EMBEDDING_M3,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    m3_dim as i32,
                ),
                false,
            ),
            Field::new(
                COLUMN_EMBEDDING_GEMMA,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    gemma_dim as i32,
                ),
                true,
            ),
            Field::new(COLUMN_SOURCE, DataType::Utf8, false),
            Field::new(COLUMN_HIT_COUNT, DataType::UInt32, false),
        ]));

        let mut terms = Vec::with_capacity(self.entries.len());
        let mut hashes = Vec::with_capacity(self.entries.len());
        let mut m3_values = Vec::with_capacity(self.entries.len() * m3_dim);
        let mut gemma_values = Vec::with_capacity(self.entries.len() * gemma_dim);
        let mut gemma_validity = Vec::with_capacity(self.entries.len());
        let mut sources = Vec::with_capacity(self.entries.len());
        let mut hit_counts = Vec::with_capacity(self.entries.len());
        for term in &self.sorted_terms {
            let entry = &self.entries[term];
            terms.push(entry.term.as_str());
            hashes.push(entry.term_hash);
            m3_values.extend(pad_to(&entry.embedding_m3, m3_dim));
            match &entry.embedding_gemma {
                Some(gemma) => {
                    gemma_values.extend(pad_to(gemma, gemma_dim));
                    gemma_validity.push(true);
                }
                None => {
                    gemma_values.extend(std::iter::repeat(0.0).take(gemma_dim));
                    gemma_validity.push(false);
                }
            }
            sources.push(entry.source.as_str());
            hit_counts.push(entry.hit_count);
        }

        let m3_array = FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float32, false)),
            m3_dim as i32,
            Arc::new(Float32Array::from(m3_values)) as ArrayRef,
            None,
        );
        let gemma_array = FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float32, false)),
            gemma_dim as i32,
            Arc::new(Float32Array::from(gemma_values)) as ArrayRef,
            Some(NullBuffer::from(gemma_validity)),
        );
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(terms)) as ArrayRef,
                Arc::new(UInt64Array::from(hashes)),
                Arc::new(m3_array),
                Arc::new(gemma_array),
                Arc::new(StringArray::from(sources)),
                Arc::new(UInt32Array::from(hit_counts)),
            ],
        )?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let properties = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(properties))?;
        writer.write(&batch)?;
        writer.close()?;

        let sidecar = serde_json::to_vec_pretty(&self.bloom_serialized())?;
        std::fs::write(Self::bloom_sidecar_path(path), sidecar)?;
        Ok(())
    }

    /// Load the persisted form. The bloom sidecar is used when present and
    /// rebuilt from the term set when not.
    pub fn load(config: LookupTableConfig, path: &Path) -> Result<Self, LookupError> {
        let mut table = Self::new(config);
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        for batch in reader {
            let batch = batch?;
            let terms = string_column(&batch, COLUMN_TERM)?;
            let hashes = batch
                .column_by_name(COLUMN_TERM_HASH)
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                .ok_or_else(|| LookupError::Corrupt("missing term_hash column".to_string()))?;
            let m3 = list_column(&batch, COLUMN_EMBEDDING_M3)?;
            let gemma = list_column(&batch, COLUMN_EMBEDDING_GEMMA)?;
            let sources = string_column(&batch, COLUMN_SOURCE)?;
            let hits = batch
                .column_by_name(COLUMN_HIT_COUNT)
                .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
                .ok_or_else(|| LookupError::Corrupt("missing hit_count column".to_string()))?;

            for row in 0..batch.num_rows() {
                let term = terms.value(row).to_string();
                let source: TermSource = sources
                    .value(row)
                    .parse()
                    .map_err(|_| LookupError::Corrupt("unknown term source".to_string()))?;
                let entry = EmbeddingLookup {
                    term: term.clone(),
                    term_hash: hashes.value(row),
                    embedding_m3: list_row(m3, row)?,
                    embedding_gemma: if gemma.is_null(row) {
                        None
                    } else {
                        Some(list_row(gemma, row)?)
                    },
                    source,
                    hit_count: hits.value(row),
                };
                table.bloom.insert(&term);
                table.entries.insert(term, entry);
            }
        }

        let sidecar_path = Self::bloom_sidecar_path(path);
        if sidecar_path.exists() {
            let serialized: SerializedBloom =
                serde_json::from_slice(&std::fs::read(&sidecar_path)?)?;
            if let Ok(bloom) = BloomFilter::from_serialized(&serialized) {
                table.bloom = bloom;
            }
        }
        table.ensure_sorted();
        Ok(table)
    }
}

fn pad_to(values: &[f32], dim: usize) -> Vec<f32> {
    let mut out = values.to_vec();
    out.resize(dim, 0.0);
    out
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, LookupError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| LookupError::Corrupt(format!("missing '{name}' column")))
}

fn list_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a FixedSizeListArray, LookupError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| LookupError::Corrupt(format!("missing '{name}' column")))
}

fn list_row(list: &FixedSizeListArray, row: usize) -> Result<Vec<f32>, LookupError> {
    let values = list.value(row);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| LookupError::Corrupt("embedding list is not f32".to_string()))?;
    Ok(floats.values().to_vec())
}
