use std::collections::HashMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tome_types::EmbeddingModel;

use crate::EmbeddingError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingClientConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "EmbeddingClientConfig::default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "EmbeddingClientConfig::default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "EmbeddingClientConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Texts longer than this are truncated before they go on the wire.
    #[serde(default = "EmbeddingClientConfig::default_max_text_chars")]
    pub max_text_chars: usize,
}

impl EmbeddingClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        EmbeddingClientConfig {
            base_url: base_url.into(),
            api_key: None,
            batch_size: Self::default_batch_size(),
            max_retries: Self::default_max_retries(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            max_text_chars: Self::default_max_text_chars(),
        }
    }

    fn default_batch_size() -> usize {
        32
    }

    fn default_max_retries() -> usize {
        5
    }

    fn default_request_timeout_secs() -> u64 {
        60
    }

    fn default_max_text_chars() -> usize {
        8192
    }
}

/// In-process cache effectiveness counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub total: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }
}

/// A request to embed a batch of texts.
#[derive(Clone, Debug, Serialize)]
pub struct EmbedRequest<'a> {
    pub model: &'a str,
    pub texts: &'a [&'a str],
}

/// A response to an embed request.
#[derive(Clone, Debug, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub cached: bool,
}

type CacheKey = (EmbeddingModel, [u8; 32]);

/// Batched client for the embedding service. The cache is the only shared
/// structure and sits behind a mutex; everything else is request-scoped.
pub struct EmbeddingClient {
    client: reqwest::Client,
    config: EmbeddingClientConfig,
    cache: Mutex<HashMap<CacheKey, Vec<f32>>>,
    stats: Mutex<CacheStats>,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingClientConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(EmbeddingClient {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Embed `texts` with `model`, returning one vector per input in input
    /// order. Duplicate and previously-seen texts are served from the
    /// cache; the rest go out in batches of at most `batch_size`.
    pub async fn embed(
        &self,
        model: EmbeddingModel,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let truncated: Vec<&str> = texts.iter().map(|t| self.truncate(t)).collect();
        let keys: Vec<CacheKey> = truncated
            .iter()
            .map(|t| (model, Sha256::digest(t.as_bytes()).into()))
            .collect();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();
        {
            let cache = self.cache.lock();
            let mut stats = self.stats.lock();
            for (i, key) in keys.iter().enumerate() {
                stats.total += 1;
                match cache.get(key) {
                    Some(vector) => {
                        stats.hits += 1;
                        results[i] = Some(vector.clone());
                    }
                    None => misses.push(i),
                }
            }
        }

        // Dedup within the miss set so a batch of identical texts costs one
        // inference call.
        let mut first_occurrence: HashMap<CacheKey, usize> = HashMap::new();
        let mut unique: Vec<usize> = Vec::new();
        for &i in &misses {
            if !first_occurrence.contains_key(&keys[i]) {
                first_occurrence.insert(keys[i], i);
                unique.push(i);
            }
        }

        for chunk in unique.chunks(self.config.batch_size.max(1)) {
            let batch: Vec<&str> = chunk.iter().map(|&i| truncated[i]).collect();
            let embeddings = self.embed_batch(model, &batch).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::LengthMismatch {
                    expected: batch.len(),
                    got: embeddings.len(),
                });
            }
            let mut cache = self.cache.lock();
            for (&i, vector) in chunk.iter().zip(embeddings) {
                if vector.len() != model.dimension() {
                    return Err(EmbeddingError::DimensionMismatch {
                        model: model.to_string(),
                        expected: model.dimension(),
                        got: vector.len(),
                    });
                }
                cache.insert(keys[i], vector);
            }
        }

        let cache = self.cache.lock();
        for i in 0..results.len() {
            if results[i].is_none() {
                results[i] = cache.get(&keys[i]).cloned();
            }
        }
        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(EmbeddingError::LengthMismatch {
                expected: texts.len(),
                got: 0,
            })
    }

    async fn embed_batch(
        &self,
        model: EmbeddingModel,
        batch: &[&str],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let send = || async {
            let request = EmbedRequest {
                model: model.api_name(),
                texts: batch,
            };
            let mut builder = self
                .client
                .post(format!("{}/embeddings", self.config.base_url))
                .json(&request);
            if let Some(api_key) = &self.config.api_key {
                builder = builder.bearer_auth(api_key);
            }
            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            let parsed = response.json::<EmbedResponse>().await?;
            Ok(parsed.embeddings)
        };

        send.retry(
            ExponentialBuilder::default()
                .with_max_times(self.config.max_retries)
                .with_jitter(),
        )
        .when(EmbeddingError::is_transient)
        .notify(|err, dur| {
            tracing::warn!(error = %err, backoff = ?dur, "retrying embedding batch");
        })
        .await
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.config.max_text_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}
