//! The streaming ingestion pipeline: dump bytes in, a published archive
//! out.
//!
//! Stages are lazy producers joined by bounded channels: download,
//! decompress, XML page split, wikitext parse, classify, batch. A batch
//! fans out to the embedding client and the partitioned parquet writer;
//! the index builder tracks every written file; finalize publishes the
//! manifest.

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod decompress;
pub mod driver;
pub mod indexes;
pub mod manifest;
pub mod reader;
pub mod record;
pub mod source;
pub mod writer;
pub mod xml;

pub use config::IngestConfig;
pub use driver::{IngestOutcome, IngestPipeline, ProgressReport};
