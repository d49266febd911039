//! Single-file on-disk vector index.
//!
//! Layout, all integers little-endian:
//!
//! | bytes | content |
//! |---|---|
//! | 0..4 | magic `"LANC"` |
//! | 4..8 | version (u32) |
//! | 8..12 | metadata length (u32) |
//! | 12..16 | flags (u32); bit 0 = IVF-PQ section present |
//! | 16.. | UTF-8 JSON metadata |
//! | .. | columnar payloads: id, title, type, chunk_index, text_preview, embedding, model, created_at |
//! | .. | optional IVF-PQ section |
//! | last 72 | nine f64 column offsets, in file order |
//!
//! String columns are `(row_count + 1)` u32 offsets followed by the
//! concatenated UTF-8 heap. `model` and `created_at` are single-entry
//! string columns shared by every row. The ninth footer offset points at
//! the IVF-PQ section and is zero when the section is absent.
//!
//! Readers fetch the header and footer first (two small range requests)
//! and then fetch column sections lazily.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

use crate::ivfpq::pq::{ProductQuantizer, CODEBOOK_SIZE};
use crate::ivfpq::{IvfPqConfig, IvfPqData};

pub const MAGIC: [u8; 4] = *b"LANC";
pub const VERSION: u32 = 1;
pub const FLAG_IVFPQ: u32 = 1;
/// Nine f64 offsets: eight columns plus the IVF-PQ section.
pub const FOOTER_LEN: u64 = 72;
const COLUMN_COUNT: usize = 9;

#[derive(Error, Debug)]
pub enum VectorFileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a vector index file (bad magic)")]
    BadMagic,
    #[error("unsupported vector file version {0}")]
    UnsupportedVersion(u32),
    #[error("corrupt vector file: {0}")]
    Corrupt(String),
}

impl TomeError for VectorFileError {
    fn code(&self) -> ErrorCodes {
        match self {
            VectorFileError::Io(_) => ErrorCodes::Internal,
            _ => ErrorCodes::DataLoss,
        }
    }
}

impl VectorFileError {
    /// Corruption is treated as "index absent" by callers that can
    /// rebuild; everything else propagates.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            VectorFileError::BadMagic
                | VectorFileError::UnsupportedVersion(_)
                | VectorFileError::Corrupt(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorFileMetadata {
    pub schema: Vec<String>,
    pub row_count: u64,
    pub embedding_dimension: usize,
    pub index_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_config: Option<IvfPqConfig>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorFileRecord {
    pub id: String,
    pub title: String,
    pub article_type: String,
    pub chunk_index: u32,
    pub text_preview: String,
}

fn schema_fields() -> Vec<String> {
    [
        "id",
        "title",
        "type",
        "chunk_index",
        "text_preview",
        "embedding",
        "model",
        "created_at",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

///////////////////////////////////////////// writer ///////////////////////////////////////////////

pub struct VectorFileWriter;

impl VectorFileWriter {
    /// Serialize records, embeddings (row-major, `dimension` per row), and
    /// an optional trained IVF-PQ payload into the single-file format.
    pub fn write_to(
        mut out: impl Write,
        records: &[VectorFileRecord],
        embeddings: &[f32],
        dimension: usize,
        model: &str,
        created_at: &str,
        ivfpq: Option<&IvfPqData>,
        index_config: Option<IvfPqConfig>,
    ) -> Result<VectorFileMetadata, VectorFileError> {
        let row_count = records.len() as u64;
        if embeddings.len() != records.len() * dimension {
            return Err(VectorFileError::Corrupt(format!(
                "embedding buffer holds {} floats, expected {}",
                embeddings.len(),
                records.len() * dimension
            )));
        }
        let metadata = VectorFileMetadata {
            schema: schema_fields(),
            row_count,
            embedding_dimension: dimension,
            index_type: if ivfpq.is_some() { "ivfpq" } else { "flat" }.to_string(),
            index_config,
        };
        let metadata_bytes = serde_json::to_vec(&metadata)?;
        let flags = if ivfpq.is_some() { FLAG_IVFPQ } else { 0 };

        out.write_all(&MAGIC)?;
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(metadata_bytes.len() as u32)?;
        out.write_u32::<LittleEndian>(flags)?;
        out.write_all(&metadata_bytes)?;

        let mut offsets = [0f64; COLUMN_COUNT];
        let mut position = 16 + metadata_bytes.len() as u64;

        let string_col = |values: Vec<&str>| -> Vec<u8> {
            let mut buf = Vec::new();
            let mut running = 0u32;
            buf.extend_from_slice(&running.to_le_bytes());
            for v in &values {
                running += v.len() as u32;
                buf.extend_from_slice(&running.to_le_bytes());
            }
            for v in &values {
                buf.extend_from_slice(v.as_bytes());
            }
            buf
        };

        let columns: Vec<Vec<u8>> = vec![
            string_col(records.iter().map(|r| r.id.as_str()).collect()),
            string_col(records.iter().map(|r| r.title.as_str()).collect()),
            string_col(records.iter().map(|r| r.article_type.as_str()).collect()),
            records
                .iter()
                .flat_map(|r| r.chunk_index.to_le_bytes())
                .collect(),
            string_col(records.iter().map(|r| r.text_preview.as_str()).collect()),
            embeddings.iter().flat_map(|f| f.to_le_bytes()).collect(),
            string_col(vec![model]),
            string_col(vec![created_at]),
        ];
        for (i, column) in columns.iter().enumerate() {
            offsets[i] = position as f64;
            out.write_all(column)?;
            position += column.len() as u64;
        }

        if let Some(data) = ivfpq {
            offsets[8] = position as f64;
            write_ivfpq_section(&mut out, data)?;
        } else {
            offsets[8] = 0.0;
        }

        for offset in offsets {
            out.write_f64::<LittleEndian>(offset)?;
        }
        Ok(metadata)
    }

    pub fn write_file(
        path: &Path,
        records: &[VectorFileRecord],
        embeddings: &[f32],
        dimension: usize,
        model: &str,
        created_at: &str,
        ivfpq: Option<&IvfPqData>,
        index_config: Option<IvfPqConfig>,
    ) -> Result<VectorFileMetadata, VectorFileError> {
        let file = File::create(path)?;
        let metadata = Self::write_to(
            &file, records, embeddings, dimension, model, created_at, ivfpq, index_config,
        )?;
        file.sync_all()?;
        Ok(metadata)
    }
}

fn write_ivfpq_section(out: &mut impl Write, data: &IvfPqData) -> Result<(), VectorFileError> {
    out.write_u32::<LittleEndian>(data.num_partitions() as u32)?;
    out.write_u32::<LittleEndian>(data.quantizer.num_sub_quantizers as u32)?;
    out.write_u32::<LittleEndian>(data.dimension as u32)?;
    out.write_u32::<LittleEndian>(data.row_count() as u32)?;
    for f in &data.centroids {
        out.write_f32::<LittleEndian>(*f)?;
    }
    for f in &data.quantizer.codebooks {
        out.write_f32::<LittleEndian>(*f)?;
    }
    for a in &data.assignments {
        out.write_u32::<LittleEndian>(*a)?;
    }
    out.write_all(&data.pq_codes)?;
    for o in &data.partition_offsets {
        out.write_u32::<LittleEndian>(*o)?;
    }
    for id in &data.sorted_ids {
        out.write_u32::<LittleEndian>(*id)?;
    }
    Ok(())
}

///////////////////////////////////////////// reader ///////////////////////////////////////////////

/// Byte-range access. Local files implement it with seeks; an object-store
/// backend would map it onto ranged GETs.
pub trait RangeReader {
    fn len(&mut self) -> Result<u64, std::io::Error>;
    fn read_range(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, std::io::Error>;

    fn is_empty(&mut self) -> Result<bool, std::io::Error> {
        Ok(self.len()? == 0)
    }
}

pub struct FileRangeReader {
    file: File,
}

impl FileRangeReader {
    pub fn open(path: &Path) -> Result<Self, std::io::Error> {
        Ok(FileRangeReader {
            file: File::open(path)?,
        })
    }
}

impl RangeReader for FileRangeReader {
    fn len(&mut self) -> Result<u64, std::io::Error> {
        Ok(self.file.metadata()?.len())
    }

    fn read_range(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, std::io::Error> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Column indexes in footer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    Id = 0,
    Title = 1,
    Type = 2,
    ChunkIndex = 3,
    TextPreview = 4,
    Embedding = 5,
    Model = 6,
    CreatedAt = 7,
    IvfPq = 8,
}

pub struct VectorFileReader<R: RangeReader> {
    reader: R,
    metadata: VectorFileMetadata,
    flags: u32,
    offsets: [u64; COLUMN_COUNT],
    file_len: u64,
    footer_start: u64,
}

impl<R: RangeReader> VectorFileReader<R> {
    /// Two small range requests: header + metadata, then the footer.
    pub fn open(mut reader: R) -> Result<Self, VectorFileError> {
        let file_len = reader.len()?;
        if file_len < 16 + FOOTER_LEN {
            return Err(VectorFileError::Corrupt(format!(
                "file too short: {file_len} bytes"
            )));
        }
        let header = reader.read_range(0, 16)?;
        if header[0..4] != MAGIC {
            return Err(VectorFileError::BadMagic);
        }
        let mut cursor = &header[4..];
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(VectorFileError::UnsupportedVersion(version));
        }
        let metadata_len = cursor.read_u32::<LittleEndian>()? as u64;
        let flags = cursor.read_u32::<LittleEndian>()?;
        if 16 + metadata_len + FOOTER_LEN > file_len {
            return Err(VectorFileError::Corrupt(
                "metadata length exceeds file".to_string(),
            ));
        }
        let metadata: VectorFileMetadata =
            serde_json::from_slice(&reader.read_range(16, metadata_len)?)?;

        let footer_start = file_len - FOOTER_LEN;
        let footer = reader.read_range(footer_start, FOOTER_LEN)?;
        let mut offsets = [0u64; COLUMN_COUNT];
        let mut cursor = footer.as_slice();
        for offset in &mut offsets {
            let raw = cursor.read_f64::<LittleEndian>()?;
            if raw < 0.0 || raw > file_len as f64 {
                return Err(VectorFileError::Corrupt(format!(
                    "column offset {raw} out of bounds"
                )));
            }
            *offset = raw as u64;
        }

        Ok(VectorFileReader {
            reader,
            metadata,
            flags,
            offsets,
            file_len,
            footer_start,
        })
    }

    pub fn metadata(&self) -> &VectorFileMetadata {
        &self.metadata
    }

    pub fn has_ivfpq(&self) -> bool {
        self.flags & FLAG_IVFPQ != 0
    }

    pub fn column_offsets(&self) -> [u64; COLUMN_COUNT] {
        self.offsets
    }

    fn column_end(&self, column: Column) -> u64 {
        let index = column as usize;
        self.offsets[index + 1..]
            .iter()
            .copied()
            .find(|&o| o != 0)
            .unwrap_or(self.footer_start)
    }

    fn read_column(&mut self, column: Column) -> Result<Vec<u8>, VectorFileError> {
        let start = self.offsets[column as usize];
        let end = self.column_end(column);
        if start == 0 && column == Column::IvfPq {
            return Err(VectorFileError::Corrupt(
                "no IVF-PQ section in this file".to_string(),
            ));
        }
        if start > end || end > self.file_len {
            return Err(VectorFileError::Corrupt(format!(
                "column {:?} range {start}..{end} invalid",
                column
            )));
        }
        Ok(self.reader.read_range(start, end - start)?)
    }

    pub fn read_string_column(&mut self, column: Column) -> Result<Vec<String>, VectorFileError> {
        let entry_count = match column {
            Column::Model | Column::CreatedAt => 1,
            _ => self.metadata.row_count as usize,
        };
        let bytes = self.read_column(column)?;
        let offsets_len = (entry_count + 1) * 4;
        if bytes.len() < offsets_len {
            return Err(VectorFileError::Corrupt(format!(
                "string column {:?} shorter than its offsets",
                column
            )));
        }
        let mut cursor = &bytes[..offsets_len];
        let mut string_offsets = Vec::with_capacity(entry_count + 1);
        for _ in 0..=entry_count {
            string_offsets.push(cursor.read_u32::<LittleEndian>()? as usize);
        }
        let heap = &bytes[offsets_len..];
        let mut values = Vec::with_capacity(entry_count);
        for pair in string_offsets.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            if start > end || end > heap.len() {
                return Err(VectorFileError::Corrupt(format!(
                    "string heap range {start}..{end} invalid"
                )));
            }
            values.push(
                std::str::from_utf8(&heap[start..end])
                    .map_err(|e| VectorFileError::Corrupt(e.to_string()))?
                    .to_string(),
            );
        }
        Ok(values)
    }

    pub fn read_chunk_indexes(&mut self) -> Result<Vec<u32>, VectorFileError> {
        let bytes = self.read_column(Column::ChunkIndex)?;
        let expected = self.metadata.row_count as usize * 4;
        if bytes.len() < expected {
            return Err(VectorFileError::Corrupt(
                "chunk_index column truncated".to_string(),
            ));
        }
        Ok(bytes[..expected]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().expect("chunks_exact(4)")))
            .collect())
    }

    /// Row-major `row_count * embedding_dimension` floats.
    pub fn read_embeddings(&mut self) -> Result<Vec<f32>, VectorFileError> {
        let bytes = self.read_column(Column::Embedding)?;
        let expected = self.metadata.row_count as usize * self.metadata.embedding_dimension * 4;
        if bytes.len() < expected {
            return Err(VectorFileError::Corrupt(
                "embedding column truncated".to_string(),
            ));
        }
        Ok(bytes[..expected]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("chunks_exact(4)")))
            .collect())
    }

    pub fn read_records(&mut self) -> Result<Vec<VectorFileRecord>, VectorFileError> {
        let ids = self.read_string_column(Column::Id)?;
        let titles = self.read_string_column(Column::Title)?;
        let types = self.read_string_column(Column::Type)?;
        let chunk_indexes = self.read_chunk_indexes()?;
        let previews = self.read_string_column(Column::TextPreview)?;
        Ok(ids
            .into_iter()
            .zip(titles)
            .zip(types)
            .zip(chunk_indexes)
            .zip(previews)
            .map(
                |((((id, title), article_type), chunk_index), text_preview)| VectorFileRecord {
                    id,
                    title,
                    article_type,
                    chunk_index,
                    text_preview,
                },
            )
            .collect())
    }

    pub fn read_ivfpq(&mut self) -> Result<IvfPqData, VectorFileError> {
        if !self.has_ivfpq() {
            return Err(VectorFileError::Corrupt(
                "no IVF-PQ section in this file".to_string(),
            ));
        }
        let bytes = self.read_column(Column::IvfPq)?;
        let mut cursor = bytes.as_slice();
        let num_partitions = cursor.read_u32::<LittleEndian>()? as usize;
        let num_sub = cursor.read_u32::<LittleEndian>()? as usize;
        let dimension = cursor.read_u32::<LittleEndian>()? as usize;
        let row_count = cursor.read_u32::<LittleEndian>()? as usize;
        if num_sub == 0 || dimension == 0 || dimension % num_sub != 0 {
            return Err(VectorFileError::Corrupt(format!(
                "bad IVF-PQ geometry: {num_sub} sub-quantizers over {dimension} dims"
            )));
        }
        let sub_dimension = dimension / num_sub;

        let centroids = read_f32_vec(&mut cursor, num_partitions * dimension)?;
        let codebooks = read_f32_vec(&mut cursor, num_sub * CODEBOOK_SIZE * sub_dimension)?;
        let assignments = read_u32_vec(&mut cursor, row_count)?;
        let mut pq_codes = vec![0u8; row_count * num_sub];
        cursor.read_exact(&mut pq_codes)?;
        let partition_offsets = read_u32_vec(&mut cursor, num_partitions + 1)?;
        let sorted_ids = read_u32_vec(&mut cursor, row_count)?;

        Ok(IvfPqData {
            dimension,
            centroids,
            quantizer: ProductQuantizer {
                num_sub_quantizers: num_sub,
                sub_dimension,
                codebooks,
            },
            assignments,
            pq_codes,
            partition_offsets,
            sorted_ids,
        })
    }
}

fn read_f32_vec(cursor: &mut &[u8], count: usize) -> Result<Vec<f32>, VectorFileError> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(cursor.read_f32::<LittleEndian>()?);
    }
    Ok(values)
}

fn read_u32_vec(cursor: &mut &[u8], count: usize) -> Result<Vec<u32>, VectorFileError> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(cursor.read_u32::<LittleEndian>()?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_data(
        num_partitions: usize,
        num_sub: usize,
        dimension: usize,
        rows: usize,
    ) -> IvfPqData {
        let sub_dimension = dimension / num_sub;
        let assignments: Vec<u32> = (0..rows).map(|i| (i % num_partitions) as u32).collect();
        let mut counts = vec![0u32; num_partitions];
        for &a in &assignments {
            counts[a as usize] += 1;
        }
        let mut partition_offsets = vec![0u32; num_partitions + 1];
        for p in 0..num_partitions {
            partition_offsets[p + 1] = partition_offsets[p] + counts[p];
        }
        let mut cursor = partition_offsets[..num_partitions].to_vec();
        let mut sorted_ids = vec![0u32; rows];
        for (row, &a) in assignments.iter().enumerate() {
            sorted_ids[cursor[a as usize] as usize] = row as u32;
            cursor[a as usize] += 1;
        }
        IvfPqData {
            dimension,
            centroids: (0..num_partitions * dimension).map(|i| i as f32 * 0.5).collect(),
            quantizer: ProductQuantizer {
                num_sub_quantizers: num_sub,
                sub_dimension,
                codebooks: (0..num_sub * CODEBOOK_SIZE * sub_dimension)
                    .map(|i| (i % 97) as f32)
                    .collect(),
            },
            assignments,
            pq_codes: (0..rows * num_sub).map(|i| (i % 251) as u8).collect(),
            partition_offsets,
            sorted_ids,
        }
    }

    fn records(n: usize) -> Vec<VectorFileRecord> {
        (0..n)
            .map(|i| VectorFileRecord {
                id: format!("id-{i}"),
                title: format!("Title {i}"),
                article_type: "person".to_string(),
                chunk_index: i as u32,
                text_preview: format!("preview {i}"),
            })
            .collect()
    }

    #[test]
    fn round_trip_recovers_everything_byte_exactly() {
        let dimension = 128;
        let rows = 100;
        let data = synthetic_data(16, 8, dimension, rows);
        let embeddings: Vec<f32> = (0..rows * dimension).map(|i| i as f32 * 0.01).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.lance");
        VectorFileWriter::write_file(
            &path,
            &records(rows),
            &embeddings,
            dimension,
            "bge-m3",
            "2026-01-01T00:00:00Z",
            Some(&data),
            Some(IvfPqConfig {
                num_partitions: 16,
                num_sub_quantizers: 8,
                ..IvfPqConfig::new(dimension)
            }),
        )
        .unwrap();

        let mut reader = VectorFileReader::open(FileRangeReader::open(&path).unwrap()).unwrap();
        assert!(reader.has_ivfpq());
        assert_eq!(reader.metadata().row_count, rows as u64);
        assert_eq!(reader.metadata().embedding_dimension, dimension);
        assert_eq!(reader.metadata().index_type, "ivfpq");

        let restored = reader.read_ivfpq().unwrap();
        assert_eq!(restored, data);
        assert_eq!(reader.read_embeddings().unwrap(), embeddings);
        assert_eq!(reader.read_records().unwrap(), records(rows));
        assert_eq!(
            reader.read_string_column(Column::Model).unwrap(),
            vec!["bge-m3".to_string()]
        );
    }

    #[test]
    fn footer_parse_recovers_all_nine_offsets() {
        // P=16, M=8, D=128 as in the interchange scenario; centroids come
        // back as 16*128 floats (16*128*4 bytes).
        let dimension = 128;
        let rows = 50;
        let data = synthetic_data(16, 8, dimension, rows);
        let embeddings = vec![0.25f32; rows * dimension];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.lance");
        VectorFileWriter::write_file(
            &path,
            &records(rows),
            &embeddings,
            dimension,
            "bge-m3",
            "2026-01-01T00:00:00Z",
            Some(&data),
            None,
        )
        .unwrap();
        let mut reader = VectorFileReader::open(FileRangeReader::open(&path).unwrap()).unwrap();
        let offsets = reader.column_offsets();
        assert!(offsets[..8].windows(2).all(|p| p[0] < p[1]));
        assert!(offsets[8] > offsets[7]);
        let restored = reader.read_ivfpq().unwrap();
        assert_eq!(restored.centroids.len(), 16 * 128);
        assert_eq!(restored.centroids.len() * 4, 16 * 128 * 4);
    }

    #[test]
    fn flat_file_has_no_ivfpq_section() {
        let dimension = 8;
        let rows = 3;
        let embeddings = vec![0.0f32; rows * dimension];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.lance");
        VectorFileWriter::write_file(
            &path,
            &records(rows),
            &embeddings,
            dimension,
            "gemma",
            "2026-01-01T00:00:00Z",
            None,
            None,
        )
        .unwrap();
        let mut reader = VectorFileReader::open(FileRangeReader::open(&path).unwrap()).unwrap();
        assert!(!reader.has_ivfpq());
        assert_eq!(reader.column_offsets()[8], 0);
        assert!(reader.read_ivfpq().is_err());
        assert_eq!(reader.metadata().index_type, "flat");
    }

    #[test]
    fn bad_magic_reads_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-lance.bin");
        std::fs::write(&path, vec![0u8; 200]).unwrap();
        match VectorFileReader::open(FileRangeReader::open(&path).unwrap()) {
            Err(e) => assert!(e.is_corruption()),
            Ok(_) => panic!("expected corruption error"),
        }
    }

    #[test]
    fn short_file_reads_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"LANC").unwrap();
        match VectorFileReader::open(FileRangeReader::open(&path).unwrap()) {
            Err(e) => assert!(e.is_corruption()),
            Ok(_) => panic!("expected corruption error"),
        }
    }
}
