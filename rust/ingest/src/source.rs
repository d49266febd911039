//! Resumable byte source for dump downloads.
//!
//! HTTP sources use ranged GETs (`Range: bytes=from-`) so an interrupted
//! ingest resumes where the checkpoint left off; local paths stream
//! through the same interface. The returned stream is lazy, finite, and
//! consumed by exactly one reader.

use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tome_error::{ErrorCodes, TomeError};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("fetch failed for {url}: status {status}")]
    Fetch { url: String, status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download aborted")]
    Aborted,
}

impl TomeError for SourceError {
    fn code(&self) -> ErrorCodes {
        match self {
            SourceError::Fetch { .. } => ErrorCodes::NotFound,
            SourceError::Network(_) => ErrorCodes::Unavailable,
            SourceError::Io(_) => ErrorCodes::Internal,
            SourceError::Aborted => ErrorCodes::Cancelled,
        }
    }
}

impl SourceError {
    fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(e) => e.is_timeout() || e.is_connect(),
            SourceError::Fetch { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SourceProgress {
    pub bytes_downloaded: u64,
    pub bytes_per_second: f64,
    pub elapsed: Duration,
}

pub type ProgressCallback = Arc<dyn Fn(&SourceProgress) + Send + Sync>;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SourceError>> + Send>>;

/// Where the dump bytes come from.
#[derive(Clone, Debug, PartialEq)]
pub enum DumpSource {
    Http { url: String },
    File { path: String },
}

impl DumpSource {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            DumpSource::Http {
                url: location.to_string(),
            }
        } else {
            DumpSource::File {
                path: location
                    .strip_prefix("file://")
                    .unwrap_or(location)
                    .to_string(),
            }
        }
    }

    pub fn location(&self) -> &str {
        match self {
            DumpSource::Http { url } => url,
            DumpSource::File { path } => path,
        }
    }

    /// Total size when the backend can tell us cheaply (HEAD / metadata).
    pub async fn content_length(&self) -> Option<u64> {
        match self {
            DumpSource::Http { url } => {
                let client = reqwest::Client::new();
                let response = client.head(url).send().await.ok()?;
                response.content_length()
            }
            DumpSource::File { path } => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
        }
    }

    /// Open the byte stream, optionally resuming at `resume_from`.
    /// Establishing the connection retries transient failures with
    /// exponential backoff; permanent statuses (404, 416) fail with
    /// [`SourceError::Fetch`].
    pub async fn open(
        &self,
        resume_from: u64,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<ByteStream, SourceError> {
        let inner: ByteStream = match self {
            DumpSource::Http { url } => {
                let url = url.clone();
                let connect = || {
                    let url = url.clone();
                    async move {
                        let client = reqwest::Client::new();
                        let mut request = client.get(&url);
                        if resume_from > 0 {
                            request = request.header("Range", format!("bytes={resume_from}-"));
                        }
                        let response = request.send().await?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(SourceError::Fetch {
                                url: url.clone(),
                                status: status.as_u16(),
                            });
                        }
                        Ok(response)
                    }
                };
                let response = connect
                    .retry(ExponentialBuilder::default().with_max_times(5).with_jitter())
                    .when(SourceError::is_transient)
                    .notify(|err, dur| {
                        tracing::warn!(error = %err, backoff = ?dur, "retrying dump fetch");
                    })
                    .await?;
                Box::pin(response.bytes_stream().map(|item| item.map_err(SourceError::from)))
            }
            DumpSource::File { path } => {
                let mut file = tokio::fs::File::open(path).await?;
                if resume_from > 0 {
                    file.seek(SeekFrom::Start(resume_from)).await?;
                }
                Box::pin(ReaderStream::new(file).map(|item| item.map_err(SourceError::from)))
            }
        };

        Ok(instrument_stream(inner, resume_from, cancel, progress))
    }
}

/// Wrap the raw stream with cancellation and progress accounting. After a
/// cancel, consumers receive exactly one terminal `Aborted` error.
fn instrument_stream(
    inner: ByteStream,
    resume_from: u64,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
) -> ByteStream {
    struct State {
        inner: ByteStream,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
        started: Instant,
        bytes: u64,
        done: bool,
    }
    let state = State {
        inner,
        cancel,
        progress,
        started: Instant::now(),
        bytes: resume_from,
        done: false,
    };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        let next = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => {
                state.done = true;
                return Some((Err(SourceError::Aborted), state));
            }
            next = state.inner.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                state.bytes += chunk.len() as u64;
                if let Some(callback) = &state.progress {
                    let elapsed = state.started.elapsed();
                    callback(&SourceProgress {
                        bytes_downloaded: state.bytes,
                        bytes_per_second: state.bytes as f64 / elapsed.as_secs_f64().max(1e-6),
                        elapsed,
                    });
                }
                Some((Ok(chunk), state))
            }
            Some(Err(e)) => {
                state.done = true;
                Some((Err(e), state))
            }
            None => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn parse_distinguishes_http_from_paths() {
        assert_eq!(
            DumpSource::parse("https://dumps.wikimedia.org/enwiki.xml.bz2"),
            DumpSource::Http {
                url: "https://dumps.wikimedia.org/enwiki.xml.bz2".to_string()
            }
        );
        assert_eq!(
            DumpSource::parse("file:///data/dump.xml.gz"),
            DumpSource::File {
                path: "/data/dump.xml.gz".to_string()
            }
        );
        assert_eq!(
            DumpSource::parse("/data/dump.xml.gz"),
            DumpSource::File {
                path: "/data/dump.xml.gz".to_string()
            }
        );
    }

    #[tokio::test]
    async fn file_source_streams_with_progress_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();
        let source = DumpSource::parse(path.to_str().unwrap());
        assert_eq!(source.content_length().await, Some(10));

        let seen = Arc::new(AtomicU64::new(0));
        let sink = seen.clone();
        let mut stream = source
            .open(
                4,
                CancellationToken::new(),
                Some(Arc::new(move |p: &SourceProgress| {
                    sink.store(p.bytes_downloaded, Ordering::SeqCst);
                })),
            )
            .await
            .unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"456789");
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn cancellation_yields_terminal_abort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        tokio::fs::write(&path, vec![0u8; 1 << 20]).await.unwrap();
        let source = DumpSource::parse(path.to_str().unwrap());
        let cancel = CancellationToken::new();
        let mut stream = source.open(0, cancel.clone(), None).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        cancel.cancel();
        loop {
            match stream.next().await {
                Some(Err(SourceError::Aborted)) => break,
                Some(Ok(_)) => continue,
                other => panic!("expected abort, got {other:?}"),
            }
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_file_errors() {
        let source = DumpSource::parse("/definitely/not/here.xml.bz2");
        assert!(source.open(0, CancellationToken::new(), None).await.is_err());
    }
}
