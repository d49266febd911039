//! Type-partitioned parquet shard writer.
//!
//! Records route by article type into per-type buffers; a full buffer
//! flushes as one row group. A shard rolls over to the next file once a
//! flushed row group pushes it past `max_file_size`, so a single
//! oversized row group still becomes exactly one file. Within a type,
//! write order is arrival order.
//!
//! The file-count governor guards downstream object-count caps: each
//! threshold fires one warning per writer lifetime, and reaching
//! `max_files` aborts with a structured error.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use arrow::array::{
    ArrayRef, Float32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_storage::Storage;
use tome_types::{ArticleRecord, ArticleType, InfoboxValue, ShardFile};

/// Infobox keys promoted to first-class columns. The full map rides along
/// as a JSON escape hatch.
pub const SHREDDED_KEYS: &[&str] = &[
    "birth_date",
    "death_date",
    "population",
    "founded",
    "release_date",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileGovernorConfig {
    #[serde(default = "FileGovernorConfig::default_warn_at")]
    pub warn_at: Option<usize>,
    #[serde(default = "FileGovernorConfig::default_warn_high_at")]
    pub warn_high_at: Option<usize>,
    #[serde(default = "FileGovernorConfig::default_critical_at")]
    pub critical_at: Option<usize>,
    #[serde(default = "FileGovernorConfig::default_max_files")]
    pub max_files: usize,
}

impl FileGovernorConfig {
    fn default_warn_at() -> Option<usize> {
        Some(2_000)
    }

    fn default_warn_high_at() -> Option<usize> {
        Some(5_000)
    }

    fn default_critical_at() -> Option<usize> {
        Some(8_000)
    }

    fn default_max_files() -> usize {
        10_000
    }
}

impl Default for FileGovernorConfig {
    fn default() -> Self {
        FileGovernorConfig {
            warn_at: Self::default_warn_at(),
            warn_high_at: Self::default_warn_high_at(),
            critical_at: Self::default_critical_at(),
            max_files: Self::default_max_files(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "WriterConfig::default_row_group_size")]
    pub row_group_size: usize,
    #[serde(default = "WriterConfig::default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub governor: FileGovernorConfig,
}

impl WriterConfig {
    fn default_row_group_size() -> usize {
        5_000
    }

    fn default_max_file_size() -> u64 {
        256 * 1024 * 1024
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            row_group_size: Self::default_row_group_size(),
            max_file_size: Self::default_max_file_size(),
            governor: FileGovernorConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GovernorLevel {
    Warn,
    WarnHigh,
    Critical,
}

pub type GovernorCallback = Arc<dyn Fn(GovernorLevel, usize) + Send + Sync>;

#[derive(Error, Debug)]
pub enum WriterError {
    #[error(
        "file limit exceeded: {count} shard files would exceed the cap of {max}; \
         increase row_group_size or max_file_size, or consolidate types"
    )]
    FileLimitExceeded { count: usize, max: usize },
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("storage error: {0}")]
    Storage(#[from] tome_storage::PutError),
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] tome_types::RecordValidationError),
}

impl TomeError for WriterError {
    fn code(&self) -> ErrorCodes {
        match self {
            WriterError::FileLimitExceeded { .. } => ErrorCodes::ResourceExhausted,
            WriterError::InvalidRecord(_) => ErrorCodes::InvalidArgument,
            _ => ErrorCodes::Internal,
        }
    }
}

/// Where one record landed inside a written file.
#[derive(Clone, Debug, PartialEq)]
pub struct RowLocation {
    pub id: String,
    pub title: String,
    pub row_group: u32,
    pub row: u32,
}

/// A closed shard file plus the placement of every row in it.
#[derive(Clone, Debug, PartialEq)]
pub struct WrittenFile {
    pub file: ShardFile,
    pub rows: Vec<RowLocation>,
}

/// Grow-only byte sink shared with the parquet writer so the current file
/// size is observable between row groups.
#[derive(Clone, Default)]
struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    fn len(&self) -> usize {
        self.bytes.lock().expect("buffer lock").len()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.lock().expect("buffer lock"))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct OpenShard {
    writer: ArrowWriter<SharedBuffer>,
    buffer: SharedBuffer,
    shard: u32,
    row_count: u64,
    row_groups: u32,
    rows: Vec<RowLocation>,
}

pub struct ShardWriter {
    config: WriterConfig,
    storage: Storage,
    schema: Arc<Schema>,
    buffers: BTreeMap<ArticleType, Vec<ArticleRecord>>,
    open: BTreeMap<ArticleType, OpenShard>,
    next_shard: BTreeMap<ArticleType, u32>,
    written: Vec<WrittenFile>,
    files_created: usize,
    fired: Vec<GovernorLevel>,
    governor_callback: Option<GovernorCallback>,
}

impl ShardWriter {
    pub fn new(config: WriterConfig, storage: Storage) -> Self {
        ShardWriter {
            config,
            storage,
            schema: Arc::new(article_schema()),
            buffers: BTreeMap::new(),
            open: BTreeMap::new(),
            next_shard: BTreeMap::new(),
            written: Vec::new(),
            files_created: 0,
            fired: Vec::new(),
            governor_callback: None,
        }
    }

    pub fn set_governor_callback(&mut self, callback: GovernorCallback) {
        self.governor_callback = Some(callback);
    }

    /// Resume against an already-published archive: shard numbering
    /// continues after the existing files, which also count against the
    /// file governor.
    pub fn seed_existing(&mut self, files: &[ShardFile]) {
        for file in files {
            let next = self.next_shard.entry(file.article_type).or_insert(0);
            *next = (*next).max(file.shard + 1);
        }
        self.files_created += files.len();
    }

    pub fn files_created(&self) -> usize {
        self.files_created
    }

    pub fn written(&self) -> &[WrittenFile] {
        &self.written
    }

    /// Route a record into its type buffer, flushing a row group when the
    /// buffer fills.
    pub async fn add(&mut self, record: ArticleRecord) -> Result<(), WriterError> {
        record.validate()?;
        let article_type = record.article_type;
        let buffer = self.buffers.entry(article_type).or_default();
        buffer.push(record);
        if buffer.len() >= self.config.row_group_size {
            self.flush_row_group(article_type).await?;
        }
        Ok(())
    }

    /// Flush every non-empty buffer and close every open shard. The
    /// returned files are in type order, shards ascending.
    pub async fn finalize(&mut self) -> Result<Vec<WrittenFile>, WriterError> {
        let pending: Vec<ArticleType> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(t, _)| *t)
            .collect();
        for article_type in pending {
            self.flush_row_group(article_type).await?;
        }
        let open_types: Vec<ArticleType> = self.open.keys().copied().collect();
        for article_type in open_types {
            self.close_shard(article_type).await?;
        }
        Ok(std::mem::take(&mut self.written))
    }

    async fn flush_row_group(&mut self, article_type: ArticleType) -> Result<(), WriterError> {
        let records = match self.buffers.get_mut(&article_type) {
            Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
            _ => return Ok(()),
        };
        if !self.open.contains_key(&article_type) {
            self.open_shard(article_type)?;
        }
        let batch = to_record_batch(&self.schema, &records)?;
        let shard = self.open.get_mut(&article_type).expect("shard just opened");
        let row_group = shard.row_groups;
        shard.writer.write(&batch)?;
        // Ends the in-progress row group so the buffer reflects its bytes.
        shard.writer.flush()?;
        for (row, record) in records.iter().enumerate() {
            shard.rows.push(RowLocation {
                id: record.id.clone(),
                title: record.title.clone(),
                row_group,
                row: row as u32,
            });
        }
        shard.row_count += records.len() as u64;
        shard.row_groups += 1;
        if shard.buffer.len() as u64 > self.config.max_file_size {
            self.close_shard(article_type).await?;
        }
        Ok(())
    }

    fn open_shard(&mut self, article_type: ArticleType) -> Result<(), WriterError> {
        self.admit_new_file()?;
        let shard = *self.next_shard.entry(article_type).or_insert(0);
        let buffer = SharedBuffer::default();
        let properties = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_max_row_group_size(self.config.row_group_size.max(1))
            .build();
        let writer = ArrowWriter::try_new(buffer.clone(), self.schema.clone(), Some(properties))?;
        self.open.insert(
            article_type,
            OpenShard {
                writer,
                buffer,
                shard,
                row_count: 0,
                row_groups: 0,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn close_shard(&mut self, article_type: ArticleType) -> Result<(), WriterError> {
        let Some(shard) = self.open.remove(&article_type) else {
            return Ok(());
        };
        let OpenShard {
            writer,
            buffer,
            shard,
            row_count,
            row_groups,
            rows,
        } = shard;
        writer.close()?;
        let bytes = buffer.take();
        let path = shard_path(article_type, shard);
        self.storage.put_bytes(&path, &bytes).await?;
        tracing::info!(
            path = %path,
            rows = row_count,
            bytes = bytes.len(),
            row_groups,
            "wrote shard file"
        );
        self.next_shard.insert(article_type, shard + 1);
        self.written.push(WrittenFile {
            file: ShardFile {
                path,
                article_type,
                shard,
                row_count,
                size_bytes: bytes.len() as u64,
                row_groups,
            },
            rows,
        });
        Ok(())
    }

    /// The file-count governor. Called once per shard creation.
    fn admit_new_file(&mut self) -> Result<(), WriterError> {
        let count = self.files_created + 1;
        if count > self.config.governor.max_files {
            return Err(WriterError::FileLimitExceeded {
                count,
                max: self.config.governor.max_files,
            });
        }
        self.files_created = count;
        for (threshold, level) in [
            (self.config.governor.critical_at, GovernorLevel::Critical),
            (self.config.governor.warn_high_at, GovernorLevel::WarnHigh),
            (self.config.governor.warn_at, GovernorLevel::Warn),
        ] {
            if let Some(threshold) = threshold {
                if count >= threshold && !self.fired.contains(&level) {
                    self.fired.push(level);
                    tracing::warn!(count, threshold, ?level, "shard file count threshold crossed");
                    if let Some(callback) = &self.governor_callback {
                        callback(level, count);
                    }
                    // Only the highest newly-crossed level fires.
                    break;
                }
            }
        }
        Ok(())
    }
}

pub fn shard_path(article_type: ArticleType, shard: u32) -> String {
    format!("data/{0}/{0}.{1}.parquet", article_type.as_str(), shard)
}

fn article_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("description", DataType::Utf8, false),
        Field::new("wikidata_id", DataType::Utf8, true),
        Field::new("coords_lat", DataType::Float32, true),
        Field::new("coords_lon", DataType::Float32, true),
        Field::new("infobox_birth_date", DataType::Utf8, true),
        Field::new("infobox_death_date", DataType::Utf8, true),
        Field::new("infobox_population", DataType::Int64, true),
        Field::new("infobox_founded", DataType::Utf8, true),
        Field::new("infobox_release_date", DataType::Utf8, true),
        Field::new("infobox_json", DataType::Utf8, true),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            "updated_at",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ])
}

fn shredded_string(record: &ArticleRecord, key: &str) -> Option<String> {
    record
        .infobox
        .as_ref()
        .and_then(|map| map.get(key))
        .map(|value| match value {
            InfoboxValue::Text(s) => s.clone(),
            InfoboxValue::Integer(i) => i.to_string(),
            InfoboxValue::Float(f) => f.to_string(),
            InfoboxValue::Bool(b) => b.to_string(),
        })
}

fn shredded_integer(record: &ArticleRecord, key: &str) -> Option<i64> {
    record.infobox.as_ref().and_then(|map| map.get(key)).and_then(|value| match value {
        InfoboxValue::Integer(i) => Some(*i),
        InfoboxValue::Text(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    })
}

fn to_record_batch(
    schema: &Arc<Schema>,
    records: &[ArticleRecord],
) -> Result<RecordBatch, arrow::error::ArrowError> {
    let infobox_json: Vec<Option<String>> = records
        .iter()
        .map(|r| {
            r.infobox
                .as_ref()
                .map(|map| serde_json::to_string(map).unwrap_or_default())
        })
        .collect();
    let updated_at = TimestampMillisecondArray::from(
        records
            .iter()
            .map(|r| r.updated_at.timestamp_millis())
            .collect::<Vec<i64>>(),
    )
    .with_timezone("UTC");

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| &r.id))),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.article_type.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| &r.title),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| &r.description),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| r.wikidata_id.clone()).collect::<Vec<_>>(),
        )),
        Arc::new(Float32Array::from(
            records.iter().map(|r| r.coords_lat).collect::<Vec<_>>(),
        )),
        Arc::new(Float32Array::from(
            records.iter().map(|r| r.coords_lon).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| shredded_string(r, "birth_date")).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| shredded_string(r, "death_date")).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            records.iter().map(|r| shredded_integer(r, "population")).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| shredded_string(r, "founded")).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| shredded_string(r, "release_date")).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(infobox_json)),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| &r.content),
        )),
        Arc::new(updated_at),
    ];
    RecordBatch::try_new(schema.clone(), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: u32, article_type: ArticleType) -> ArticleRecord {
        ArticleRecord {
            id: id.to_string(),
            article_type,
            title: format!("Title {id}"),
            description: "desc".to_string(),
            wikidata_id: None,
            coords_lat: None,
            coords_lon: None,
            infobox: Some(Map::from([(
                "population".to_string(),
                InfoboxValue::Integer(1000 + id as i64),
            )])),
            content: "content".to_string(),
            updated_at: chrono::DateTime::from_timestamp(1_700_000_000, 0)
                .unwrap()
                .with_timezone(&Utc),
            embedding: None,
        }
    }

    fn small_config() -> WriterConfig {
        WriterConfig {
            row_group_size: 2,
            max_file_size: u64::MAX,
            governor: FileGovernorConfig::default(),
        }
    }

    #[tokio::test]
    async fn routes_by_type_and_preserves_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(small_config(), Storage::new_local(dir.path()));
        writer.add(record(1, ArticleType::Person)).await.unwrap();
        writer.add(record(2, ArticleType::Place)).await.unwrap();
        writer.add(record(3, ArticleType::Person)).await.unwrap();
        let files = writer.finalize().await.unwrap();
        assert_eq!(files.len(), 2);
        let person = files
            .iter()
            .find(|f| f.file.article_type == ArticleType::Person)
            .unwrap();
        assert_eq!(person.file.path, "data/person/person.0.parquet");
        assert_eq!(person.file.row_count, 2);
        let ids: Vec<&str> = person.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(dir.path().join("data/person/person.0.parquet").exists());
    }

    #[tokio::test]
    async fn small_max_file_size_rolls_shards_over() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig {
            row_group_size: 2,
            // Every flushed row group exceeds this, so each becomes a file.
            max_file_size: 64,
            governor: FileGovernorConfig::default(),
        };
        let mut writer = ShardWriter::new(config, Storage::new_local(dir.path()));
        for i in 0..6 {
            writer.add(record(i, ArticleType::Other)).await.unwrap();
        }
        let files = writer.finalize().await.unwrap();
        assert_eq!(files.len(), 3);
        let shards: Vec<u32> = files.iter().map(|f| f.file.shard).collect();
        assert_eq!(shards, vec![0, 1, 2]);
        assert!(files.iter().all(|f| f.file.row_groups == 1));
    }

    #[tokio::test]
    async fn replaying_a_batch_produces_identical_bytes() {
        let records: Vec<ArticleRecord> = (0..5).map(|i| record(i, ArticleType::Work)).collect();
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            let mut writer = ShardWriter::new(small_config(), Storage::new_local(dir.path()));
            for r in &records {
                writer.add(r.clone()).await.unwrap();
            }
            writer.finalize().await.unwrap();
            outputs.push(std::fs::read(dir.path().join("data/work/work.0.parquet")).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn governor_warns_once_then_aborts_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig {
            row_group_size: 1,
            max_file_size: 1,
            governor: FileGovernorConfig {
                warn_at: Some(2),
                warn_high_at: None,
                critical_at: None,
                max_files: 3,
            },
        };
        let warnings = Arc::new(AtomicUsize::new(0));
        let mut writer = ShardWriter::new(config, Storage::new_local(dir.path()));
        let sink = warnings.clone();
        writer.set_governor_callback(Arc::new(move |level, _| {
            assert_eq!(level, GovernorLevel::Warn);
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        for i in 0..3 {
            writer.add(record(i, ArticleType::Other)).await.unwrap();
        }
        let error = writer.add(record(99, ArticleType::Other)).await.unwrap_err();
        match error {
            WriterError::FileLimitExceeded { count, max } => {
                assert_eq!(count, 4);
                assert_eq!(max, 3);
            }
            other => panic!("expected FileLimitExceeded, got {other}"),
        }
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        // Previously written files remain valid.
        assert!(dir.path().join("data/other/other.0.parquet").exists());
        assert!(dir.path().join("data/other/other.1.parquet").exists());
        assert!(dir.path().join("data/other/other.2.parquet").exists());
    }

    #[tokio::test]
    async fn mismatched_coords_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(small_config(), Storage::new_local(dir.path()));
        let mut bad = record(1, ArticleType::Place);
        bad.coords_lat = Some(1.0);
        assert!(matches!(
            writer.add(bad).await,
            Err(WriterError::InvalidRecord(_))
        ));
    }
}
