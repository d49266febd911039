//! Streaming decompression with format sniffing.
//!
//! The first two bytes decide: `1F 8B` is gzip, `42 5A` is bzip2; when
//! neither matches, the source name's extension breaks the tie and
//! anything else passes through raw. Decoding is windowed, so memory
//! stays O(window), never O(compressed size).

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder};
use futures::{Stream, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::source::{ByteStream, SourceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Bzip2,
    None,
}

pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
pub const BZIP2_MAGIC: [u8; 2] = [0x42, 0x5A];

/// Decide the format from leading bytes, falling back to the file name.
pub fn sniff_format(head: &[u8], name: &str) -> CompressionFormat {
    if head.len() >= 2 {
        if head[..2] == GZIP_MAGIC {
            return CompressionFormat::Gzip;
        }
        if head[..2] == BZIP2_MAGIC {
            return CompressionFormat::Bzip2;
        }
    }
    if name.ends_with(".gz") {
        CompressionFormat::Gzip
    } else if name.ends_with(".bz2") {
        CompressionFormat::Bzip2
    } else {
        CompressionFormat::None
    }
}

fn io_stream(stream: ByteStream) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    stream.map_err(|e| match e {
        SourceError::Io(io) => io,
        other => std::io::Error::other(other),
    })
}

/// Wrap the byte stream in the decoder the sniffed format calls for,
/// yielding a readable stream of decompressed bytes.
pub fn decompress(
    stream: ByteStream,
    format: CompressionFormat,
) -> Box<dyn AsyncRead + Send + Unpin> {
    let reader = StreamReader::new(io_stream(stream));
    match format {
        CompressionFormat::Gzip => Box::new(GzipDecoder::new(reader)),
        CompressionFormat::Bzip2 => Box::new(BzDecoder::new(reader)),
        CompressionFormat::None => Box::new(reader),
    }
}
