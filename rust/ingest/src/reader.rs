//! Row-level archive reads: title or id to the stored article, through
//! the gzip'd indexes and a targeted parquet row-group read.

use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_storage::Storage;
use tome_types::ArticleType;

use arrow::array::{Array, Float32Array, RecordBatch, StringArray};

use crate::indexes::{ArchiveIndexReader, IndexBuildError, TitleLocation};

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("index error: {0}")]
    Index(#[from] IndexBuildError),
    #[error("storage error: {0}")]
    Get(#[from] tome_storage::GetError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("corrupt shard file {0}")]
    Corrupt(String),
}

impl TomeError for ReadError {
    fn code(&self) -> ErrorCodes {
        match self {
            ReadError::Get(e) => e.code(),
            ReadError::Corrupt(_) => ErrorCodes::DataLoss,
            _ => ErrorCodes::Internal,
        }
    }
}

/// A stored article row as the query surface returns it.
#[derive(Clone, Debug, PartialEq)]
pub struct ArticleRow {
    pub id: String,
    pub article_type: Option<ArticleType>,
    pub title: String,
    pub description: String,
    pub coords_lat: Option<f32>,
    pub coords_lon: Option<f32>,
    pub infobox_json: Option<String>,
    pub content: String,
}

pub struct ArchiveReader {
    storage: Storage,
    indexes: ArchiveIndexReader,
}

impl ArchiveReader {
    pub async fn open(storage: Storage) -> Result<Self, ReadError> {
        let indexes = ArchiveIndexReader::open(&storage).await?;
        Ok(ArchiveReader { storage, indexes })
    }

    pub fn indexes(&self) -> &ArchiveIndexReader {
        &self.indexes
    }

    pub async fn get_by_title(&self, title: &str) -> Result<Option<ArticleRow>, ReadError> {
        let Some(location) = self.indexes.lookup_title(title).cloned() else {
            return Ok(None);
        };
        self.read_row(&location).await.map(Some)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ArticleRow>, ReadError> {
        let Some(location) = self.indexes.lookup_id(id) else {
            return Ok(None);
        };
        let location = TitleLocation {
            file: location.file.clone(),
            row_group: location.row_group,
            row: location.row,
        };
        self.read_row(&location).await.map(Some)
    }

    /// Read one row by (file, row group, row) without scanning the rest of
    /// the file.
    async fn read_row(&self, location: &TitleLocation) -> Result<ArticleRow, ReadError> {
        let bytes = Bytes::from(self.storage.get(&location.file).await?);
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let reader = builder
            .with_row_groups(vec![location.row_group as usize])
            .build()?;
        let mut remaining = location.row as usize;
        for batch in reader {
            let batch = batch?;
            if remaining < batch.num_rows() {
                return row_from_batch(&batch, remaining, &location.file);
            }
            remaining -= batch.num_rows();
        }
        Err(ReadError::Corrupt(format!(
            "{}: row {} not in row group {}",
            location.file, location.row, location.row_group
        )))
    }
}

/// Every row of a shard file with its (row group, row) placement, for
/// index rebuilds and full scans.
pub async fn scan_file(
    storage: &Storage,
    path: &str,
) -> Result<Vec<(ArticleRow, u32, u32)>, ReadError> {
    let bytes = Bytes::from(storage.get(path).await?);
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let row_group_count = builder.metadata().num_row_groups();
    let mut rows = Vec::new();
    let mut remaining_builder = Some(builder);
    for row_group in 0..row_group_count {
        let builder = match remaining_builder.take() {
            Some(b) => b,
            None => {
                let bytes = Bytes::from(storage.get(path).await?);
                ParquetRecordBatchReaderBuilder::try_new(bytes)?
            }
        };
        let reader = builder.with_row_groups(vec![row_group]).build()?;
        let mut row_in_group = 0u32;
        for batch in reader {
            let batch = batch?;
            for row in 0..batch.num_rows() {
                rows.push((row_from_batch(&batch, row, path)?, row_group as u32, row_in_group));
                row_in_group += 1;
            }
        }
    }
    Ok(rows)
}

fn string_value(batch: &RecordBatch, name: &str, row: usize, path: &str) -> Result<String, ReadError> {
    let column = batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| ReadError::Corrupt(format!("{path}: missing '{name}' column")))?;
    Ok(column.value(row).to_string())
}

fn optional_string(batch: &RecordBatch, name: &str, row: usize) -> Option<String> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .filter(|c| !c.is_null(row))
        .map(|c| c.value(row).to_string())
}

fn optional_f32(batch: &RecordBatch, name: &str, row: usize) -> Option<f32> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .filter(|c| !c.is_null(row))
        .map(|c| c.value(row))
}

fn row_from_batch(batch: &RecordBatch, row: usize, path: &str) -> Result<ArticleRow, ReadError> {
    Ok(ArticleRow {
        id: string_value(batch, "id", row, path)?,
        article_type: string_value(batch, "type", row, path)?.parse().ok(),
        title: string_value(batch, "title", row, path)?,
        description: string_value(batch, "description", row, path)?,
        coords_lat: optional_f32(batch, "coords_lat", row),
        coords_lon: optional_f32(batch, "coords_lon", row),
        infobox_json: optional_string(batch, "infobox_json", row),
        content: string_value(batch, "content", row, path)?,
    })
}
