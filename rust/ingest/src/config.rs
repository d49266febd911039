use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use tome_embed::EmbeddingClientConfig;
use tome_types::EmbeddingModel;

use crate::classify::ClassifierRules;
use crate::writer::WriterConfig;

pub const DEFAULT_CONFIG_PATH: &str = "./tome.yaml";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// HTTPS URL or local path of the `.xml.bz2` / `.xml.gz` dump.
    pub dump_url: String,
    pub output_dir: String,
    #[serde(default = "IngestConfig::default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "IngestConfig::default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Stop after this many articles; unset means the whole dump.
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default = "IngestConfig::default_skip_redirects")]
    pub skip_redirects: bool,
    #[serde(default)]
    pub skip_disambiguations: bool,
    #[serde(default)]
    pub generate_embeddings: bool,
    #[serde(default = "IngestConfig::default_embeddings_model")]
    pub embeddings_model: EmbeddingModel,
    #[serde(default)]
    pub embeddings: Option<EmbeddingClientConfig>,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub classifier: ClassifierRules,
    /// Queue depth between pipeline stages.
    #[serde(default = "IngestConfig::default_channel_depth")]
    pub channel_depth: usize,
}

impl IngestConfig {
    pub fn new(dump_url: impl Into<String>, output_dir: impl Into<String>) -> Self {
        IngestConfig {
            dump_url: dump_url.into(),
            output_dir: output_dir.into(),
            batch_size: Self::default_batch_size(),
            checkpoint_interval: Self::default_checkpoint_interval(),
            limit: None,
            skip_redirects: Self::default_skip_redirects(),
            skip_disambiguations: false,
            generate_embeddings: false,
            embeddings_model: Self::default_embeddings_model(),
            embeddings: None,
            writer: WriterConfig::default(),
            classifier: ClassifierRules::default(),
            channel_depth: Self::default_channel_depth(),
        }
    }

    fn default_batch_size() -> usize {
        256
    }

    fn default_checkpoint_interval() -> u64 {
        10_000
    }

    fn default_skip_redirects() -> bool {
        true
    }

    fn default_embeddings_model() -> EmbeddingModel {
        EmbeddingModel::BgeM3
    }

    fn default_channel_depth() -> usize {
        64
    }

    /// Yaml file (when present) merged with `TOME_`-prefixed variables and
    /// the operator-facing environment names.
    pub fn load_from_path(path: &str) -> Result<Self, figment::Error> {
        let mut figment = figment::Figment::from(Env::prefixed("TOME_"));
        for (env, key) in [
            ("WIKIPEDIA_DUMP_URL", "dump_url"),
            ("OUTPUT_DIR", "output_dir"),
            ("BATCH_SIZE", "batch_size"),
            ("CHECKPOINT_INTERVAL", "checkpoint_interval"),
            ("GENERATE_EMBEDDINGS", "generate_embeddings"),
            ("EMBEDDINGS_MODEL", "embeddings_model"),
            ("EMBEDDINGS_BATCH_SIZE", "embeddings.batch_size"),
        ] {
            figment = figment.merge(Env::raw().only(&[env]).map(move |_| key.into()));
        }
        if std::path::Path::new(path).exists() {
            figment = figment::Figment::from(Yaml::file(path)).merge(figment);
        }
        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("WIKIPEDIA_DUMP_URL", "https://dumps.example/enwiki.xml.bz2");
            jail.set_env("OUTPUT_DIR", "/tmp/archive");
            let config = IngestConfig::load_from_path("./missing.yaml").expect("config loads");
            assert_eq!(config.dump_url, "https://dumps.example/enwiki.xml.bz2");
            assert_eq!(config.batch_size, 256);
            assert!(config.skip_redirects);
            assert_eq!(config.embeddings_model, EmbeddingModel::BgeM3);
            Ok(())
        });
    }

    #[test]
    fn yaml_overrides_defaults_and_env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "tome.yaml",
                r#"
dump_url: file:///dump.xml.gz
output_dir: /data/archive
batch_size: 16
"#,
            )?;
            jail.set_env("BATCH_SIZE", "8");
            let config = IngestConfig::load_from_path("tome.yaml").expect("config loads");
            assert_eq!(config.output_dir, "/data/archive");
            assert_eq!(config.batch_size, 8);
            Ok(())
        });
    }
}
