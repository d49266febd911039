//! End-to-end ingest: download, decompress, split, parse, classify,
//! batch, embed, write, index, manifest.
//!
//! The producer task feeds raw pages through a bounded channel
//! (backpressure is queue depth, nothing implicit); the driver consumes,
//! batches, and owns the writer. Per-record failures land in a bounded
//! error ring and never abort; fatal failures checkpoint first.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tome_embed::{CacheStats, EmbeddingClient};
use tome_error::{ErrorCodes, TomeError};
use tome_storage::Storage;
use tome_types::{
    ArticleRecord, ArticleType, Checkpoint, ClassifiedArticle, Manifest, RawPage,
    MANIFEST_VERSION,
};
use tome_wikitext::WikitextParser;

use crate::checkpoint;
use crate::classify::Classifier;
use crate::config::IngestConfig;
use crate::decompress::{decompress, sniff_format, CompressionFormat};
use crate::indexes::ArchiveIndexBuilder;
use crate::manifest;
use crate::record::build_record;
use crate::source::{DumpSource, SourceError, SourceProgress};
use crate::writer::{ShardWriter, WriterError};
use crate::xml::{PageSplitter, XmlError};

const ERROR_RING_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("malformed dump: {0}")]
    Xml(#[from] XmlError),
    #[error("writer error: {0}")]
    Writer(#[from] WriterError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] crate::checkpoint::CheckpointError),
    #[error("index error: {0}")]
    Index(#[from] crate::indexes::IndexBuildError),
    #[error("manifest error: {0}")]
    Manifest(#[from] crate::manifest::ManifestError),
    #[error("embedding client error: {0}")]
    Embedding(#[from] tome_embed::EmbeddingError),
}

impl TomeError for IngestError {
    fn code(&self) -> ErrorCodes {
        match self {
            IngestError::Source(e) => e.code(),
            IngestError::Xml(e) => e.code(),
            IngestError::Writer(e) => e.code(),
            IngestError::Checkpoint(e) => e.code(),
            IngestError::Index(e) => e.code(),
            IngestError::Manifest(e) => e.code(),
            IngestError::Embedding(e) => e.code(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProgressReport {
    pub articles_processed: u64,
    pub articles_per_second: f64,
    pub eta: Option<Duration>,
    pub articles_by_type: BTreeMap<ArticleType, u64>,
    pub bytes_downloaded: u64,
    pub embedding_stats: Option<CacheStats>,
    pub recent_errors: usize,
}

pub type ProgressFn = Arc<dyn Fn(&ProgressReport) + Send + Sync>;

#[derive(Debug)]
pub struct IngestOutcome {
    pub manifest: Manifest,
    pub articles_processed: u64,
    pub skipped: u64,
    pub embedding_errors: u64,
    pub recent_errors: Vec<String>,
    pub aborted: bool,
}

struct IngestState {
    started: Instant,
    processed: u64,
    skipped: u64,
    embedding_errors: u64,
    by_type: BTreeMap<ArticleType, u64>,
    last_article_id: u64,
    last_article_title: String,
    error_ring: VecDeque<String>,
    since_checkpoint: u64,
}

impl IngestState {
    fn record_error(&mut self, message: String) {
        tracing::debug!(error = %message, "per-record failure");
        if self.error_ring.len() == ERROR_RING_CAPACITY {
            self.error_ring.pop_front();
        }
        self.error_ring.push_back(message);
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
    storage: Storage,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
    embedder: Option<Arc<EmbeddingClient>>,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig) -> Result<Self, IngestError> {
        let storage = Storage::new_local(&config.output_dir);
        let embedder = if config.generate_embeddings {
            let client_config = config
                .embeddings
                .clone()
                .unwrap_or_else(|| tome_embed::EmbeddingClientConfig::new("http://localhost:8000"));
            Some(Arc::new(EmbeddingClient::new(client_config)?))
        } else {
            None
        };
        Ok(IngestPipeline {
            config,
            storage,
            cancel: CancellationToken::new(),
            progress: None,
            embedder,
        })
    }

    /// The token that aborts the source and drains the pipeline at the
    /// next suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_progress_callback(&mut self, callback: ProgressFn) {
        self.progress = Some(callback);
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn run(&mut self) -> Result<IngestOutcome, IngestError> {
        let resume = checkpoint::load(&self.storage, &self.config.dump_url).await?;
        if let Some(resume) = &resume {
            tracing::info!(
                last_article_id = resume.last_article_id,
                articles = resume.articles_processed,
                "resuming from checkpoint"
            );
        }
        let started_at = resume.as_ref().map(|c| c.started_at).unwrap_or_else(Utc::now);
        let mut state = IngestState {
            started: Instant::now(),
            processed: resume.as_ref().map(|c| c.articles_processed).unwrap_or(0),
            skipped: 0,
            embedding_errors: 0,
            by_type: resume.as_ref().map(|c| c.articles_by_type.clone()).unwrap_or_default(),
            last_article_id: resume.as_ref().map(|c| c.last_article_id).unwrap_or(0),
            last_article_title: resume
                .as_ref()
                .map(|c| c.last_article_title.clone())
                .unwrap_or_default(),
            error_ring: VecDeque::new(),
            since_checkpoint: 0,
        };

        let resume_offset = ranged_resume_offset(
            self.config.dump_url.as_str(),
            resume.as_ref().map(|c| c.bytes_downloaded).unwrap_or(0),
        );
        let bytes_downloaded = Arc::new(AtomicU64::new(resume_offset));
        let mut pages = self
            .spawn_producer(bytes_downloaded.clone(), resume_offset)
            .await?;

        let parser = WikitextParser::default();
        let classifier = Classifier::new(self.config.classifier.clone());
        let mut writer = ShardWriter::new(self.config.writer.clone(), self.storage.clone());
        let prior_files = if resume.is_some() {
            manifest::load(&self.storage)
                .await
                .map(|m| m.data_files)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        writer.seed_existing(&prior_files);
        let mut index_builder =
            ArchiveIndexBuilder::resume(Default::default(), &self.storage, &prior_files).await?;
        let mut batch: Vec<ArticleRecord> = Vec::with_capacity(self.config.batch_size);
        let mut aborted = false;

        'ingest: while let Some(message) = pages.recv().await {
            let page = match message {
                Ok(page) => page,
                Err(IngestError::Source(SourceError::Aborted)) => {
                    aborted = true;
                    break 'ingest;
                }
                Err(fatal) => {
                    // Malformed stream or network death: land what we can,
                    // checkpoint, then surface.
                    let _ = self
                        .process_batch(&mut batch, &mut writer, &mut state)
                        .await;
                    self.save_checkpoint(&mut state, started_at, &bytes_downloaded).await?;
                    return Err(fatal);
                }
            };

            if let Some(classified) = self.admit(page, &parser, &classifier, &mut state) {
                batch.push(build_record(&classified));
                if batch.len() >= self.config.batch_size {
                    self.process_batch(&mut batch, &mut writer, &mut state).await?;
                    self.maybe_checkpoint(&mut state, started_at, &bytes_downloaded).await?;
                    self.report_progress(&state, &bytes_downloaded);
                }
            }

            if let Some(limit) = self.config.limit {
                if state.processed + batch.len() as u64 >= limit {
                    tracing::info!(limit, "article limit reached");
                    self.cancel.cancel();
                    break 'ingest;
                }
            }
            if self.cancel.is_cancelled() {
                aborted = true;
                break 'ingest;
            }
        }

        self.process_batch(&mut batch, &mut writer, &mut state).await?;
        let written = match writer.finalize().await {
            Ok(written) => written,
            Err(e) => {
                self.save_checkpoint(&mut state, started_at, &bytes_downloaded).await?;
                return Err(e.into());
            }
        };
        for file in &written {
            index_builder.add_file(file);
        }
        let index_files = index_builder.finalize(&self.storage).await?;

        let manifest = Manifest {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            source_url: self.config.dump_url.clone(),
            total_articles: state.processed,
            articles_by_type: state.by_type.clone(),
            data_files: prior_files
                .into_iter()
                .chain(written.into_iter().map(|w| w.file))
                .collect(),
            index_files,
        };
        manifest::publish(&self.storage, &manifest).await?;
        self.save_checkpoint(&mut state, started_at, &bytes_downloaded).await?;
        self.report_progress(&state, &bytes_downloaded);

        Ok(IngestOutcome {
            manifest,
            articles_processed: state.processed,
            skipped: state.skipped,
            embedding_errors: state.embedding_errors,
            recent_errors: state.error_ring.into_iter().collect(),
            aborted,
        })
    }

    /// Decide whether a page enters a batch; soft failures land in the
    /// error ring.
    fn admit(
        &self,
        page: RawPage,
        parser: &WikitextParser,
        classifier: &Classifier,
        state: &mut IngestState,
    ) -> Option<ClassifiedArticle> {
        if !page.is_article() {
            state.skipped += 1;
            return None;
        }
        // Dumps are monotonic by page id, so everything at or below the
        // checkpointed id has already been written.
        if page.id <= state.last_article_id && state.processed > 0 {
            state.skipped += 1;
            return None;
        }
        let article = parser.parse(page);
        if let Err(e) = article.validate() {
            state.record_error(e.to_string());
            state.skipped += 1;
            return None;
        }
        if article.is_redirect && self.config.skip_redirects {
            state.skipped += 1;
            return None;
        }
        if article.is_disambiguation && self.config.skip_disambiguations {
            state.skipped += 1;
            return None;
        }
        Some(classifier.classify_into(article))
    }

    /// Attach embeddings (when enabled) and hand the batch to the writer.
    /// Embedding exhaustion downgrades to vectorless records and a
    /// counter; writer failures are fatal.
    async fn process_batch(
        &self,
        batch: &mut Vec<ArticleRecord>,
        writer: &mut ShardWriter,
        state: &mut IngestState,
    ) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut records = std::mem::take(batch);
        if let Some(embedder) = &self.embedder {
            let texts: Vec<String> = records
                .iter()
                .map(|r| {
                    if r.description.is_empty() {
                        r.title.clone()
                    } else {
                        format!("{}\n{}", r.title, r.description)
                    }
                })
                .collect();
            match embedder.embed(self.config.embeddings_model, &texts).await {
                Ok(embeddings) => {
                    for (record, embedding) in records.iter_mut().zip(embeddings) {
                        record.embedding = Some(embedding);
                    }
                }
                Err(e) => {
                    state.embedding_errors += records.len() as u64;
                    state.record_error(format!("embedding batch failed: {e}"));
                }
            }
        }
        for record in records {
            let article_type = record.article_type;
            let id = record.id.parse().unwrap_or(state.last_article_id);
            let title = record.title.clone();
            writer.add(record).await?;
            // The checkpoint only ever names a record that reached the
            // writer, keeping `last_article_id` monotonic and safe.
            state.last_article_id = state.last_article_id.max(id);
            state.last_article_title = title;
            *state.by_type.entry(article_type).or_insert(0) += 1;
            state.processed += 1;
            state.since_checkpoint += 1;
        }
        Ok(())
    }

    async fn maybe_checkpoint(
        &self,
        state: &mut IngestState,
        started_at: chrono::DateTime<Utc>,
        bytes_downloaded: &AtomicU64,
    ) -> Result<(), IngestError> {
        if state.since_checkpoint >= self.config.checkpoint_interval {
            self.save_checkpoint(state, started_at, bytes_downloaded).await?;
        }
        Ok(())
    }

    async fn save_checkpoint(
        &self,
        state: &mut IngestState,
        started_at: chrono::DateTime<Utc>,
        bytes_downloaded: &AtomicU64,
    ) -> Result<(), IngestError> {
        let snapshot = Checkpoint {
            dump_url: self.config.dump_url.clone(),
            articles_processed: state.processed,
            last_article_id: state.last_article_id,
            last_article_title: state.last_article_title.clone(),
            articles_by_type: state.by_type.clone(),
            bytes_downloaded: bytes_downloaded.load(Ordering::Relaxed),
            started_at,
            checkpointed_at: Utc::now(),
        };
        checkpoint::save(&self.storage, &snapshot).await?;
        state.since_checkpoint = 0;
        Ok(())
    }

    fn report_progress(&self, state: &IngestState, bytes_downloaded: &AtomicU64) {
        let Some(callback) = &self.progress else {
            return;
        };
        let elapsed = state.started.elapsed().as_secs_f64().max(1e-6);
        let rate = state.processed as f64 / elapsed;
        let eta = self.config.limit.and_then(|limit| {
            let remaining = limit.saturating_sub(state.processed);
            (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
        });
        callback(&ProgressReport {
            articles_processed: state.processed,
            articles_per_second: rate,
            eta,
            articles_by_type: state.by_type.clone(),
            bytes_downloaded: bytes_downloaded.load(Ordering::Relaxed),
            embedding_stats: self.embedder.as_ref().map(|e| e.cache_stats()),
            recent_errors: state.error_ring.len(),
        });
    }

    /// Download + decompress + split on a separate task; raw pages flow
    /// back over a bounded channel. A nonzero `resume_from` turns into
    /// the source's ranged request (`Range: bytes=from-` over HTTP, a
    /// seek for local files).
    async fn spawn_producer(
        &self,
        bytes_downloaded: Arc<AtomicU64>,
        resume_from: u64,
    ) -> Result<mpsc::Receiver<Result<RawPage, IngestError>>, IngestError> {
        let (sender, receiver) = mpsc::channel(self.config.channel_depth);
        let source = DumpSource::parse(&self.config.dump_url);
        let location = source.location().to_string();
        let cancel = self.cancel.clone();
        let progress_bytes = bytes_downloaded.clone();
        let mut stream = source
            .open(
                resume_from,
                cancel.clone(),
                Some(Arc::new(move |p: &SourceProgress| {
                    progress_bytes.store(p.bytes_downloaded, Ordering::Relaxed);
                })),
            )
            .await?;

        tokio::spawn(async move {
            use futures::StreamExt;
            // Peek the first chunk so the magic bytes pick the decoder;
            // the extension only breaks ties.
            let (head, stream): (Vec<u8>, crate::source::ByteStream) = match stream.next().await {
                Some(Ok(chunk)) => {
                    let head = chunk.to_vec();
                    (
                        head,
                        Box::pin(futures::stream::once(async move { Ok(chunk) }).chain(stream)),
                    )
                }
                Some(Err(e)) => {
                    let _ = sender.send(Err(IngestError::Source(e))).await;
                    return;
                }
                None => (Vec::new(), Box::pin(futures::stream::empty())),
            };
            let format = sniff_format(&head, &location);
            let reader = decompress(stream, format);
            let mut splitter = PageSplitter::new(BufReader::new(reader));
            loop {
                match splitter.next_page().await {
                    Ok(Some(page)) => {
                        if sender.send(Ok(page)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let fatal = if cancel.is_cancelled() {
                            IngestError::Source(SourceError::Aborted)
                        } else {
                            IngestError::Xml(e)
                        };
                        let _ = sender.send(Err(fatal)).await;
                        break;
                    }
                }
            }
        });
        Ok(receiver)
    }
}

/// How far into the dump a resumed download may skip. The checkpointed
/// byte offset is only sound when the dump is served uncompressed: gzip
/// and bzip2 decoders cannot start mid-stream, so compressed dumps
/// restart at byte zero and the checkpoint id filter drops the overlap.
fn ranged_resume_offset(location: &str, checkpointed_bytes: u64) -> u64 {
    match sniff_format(&[], location) {
        CompressionFormat::None => checkpointed_bytes,
        CompressionFormat::Gzip | CompressionFormat::Bzip2 => 0,
    }
}
