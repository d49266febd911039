use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use tome_embed::{EmbeddingClient, EmbeddingClientConfig};
use tome_index::{EmbeddingLookupTable, LookupTableConfig};
use tome_ingest::manifest;
use tome_ingest::reader::scan_file;
use tome_storage::Storage;
use tome_types::{EmbeddingModel, TermSource};

pub const LOOKUP_TABLE_KEY: &str = "indexes/lookup.parquet";

#[derive(Args, Debug)]
pub struct EmbedArgs {
    #[arg(long)]
    pub data_dir: String,
    /// Embedding service endpoint.
    #[arg(long, default_value = "http://localhost:8000")]
    pub endpoint: String,
    #[arg(long, default_value = "bge-m3")]
    pub model: String,
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
}

/// Build the embedding lookup table from every article title in the
/// archive, batch-embedding through the external service.
pub async fn embed(args: EmbedArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model: EmbeddingModel = args.model.parse()?;
    let storage = Storage::new_local(&args.data_dir);
    let manifest = manifest::load(&storage).await?;

    let mut terms: Vec<(String, TermSource)> = Vec::new();
    for file in &manifest.data_files {
        for (row, _, _) in scan_file(&storage, &file.path).await? {
            terms.push((row.title, TermSource::Title));
        }
    }
    tracing::info!(terms = terms.len(), "collected lookup terms");

    let client = EmbeddingClient::new(EmbeddingClientConfig {
        batch_size: args.batch_size,
        ..EmbeddingClientConfig::new(&args.endpoint)
    })?;
    let mut table = EmbeddingLookupTable::new(LookupTableConfig {
        bloom_expected_items: terms.len().max(1),
        ..LookupTableConfig::default()
    });

    let bar = ProgressBar::new(terms.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} terms")
            .expect("static progress template"),
    );
    for chunk in terms.chunks(args.batch_size.max(1)) {
        let texts: Vec<String> = chunk.iter().map(|(term, _)| term.clone()).collect();
        let embeddings = client.embed(model, &texts).await?;
        for ((term, source), embedding) in chunk.iter().zip(embeddings) {
            let (m3, gemma) = match model {
                EmbeddingModel::BgeM3 => (embedding, None),
                EmbeddingModel::Gemma | EmbeddingModel::Gemma300 => {
                    (Vec::new(), Some(embedding))
                }
            };
            table.insert(term, m3, gemma, *source);
        }
        bar.inc(chunk.len() as u64);
    }
    bar.finish_and_clear();

    let path = Path::new(&args.data_dir).join(LOOKUP_TABLE_KEY);
    table.save(&path)?;
    let stats = client.cache_stats();
    println!(
        "wrote {} terms to {} (embed cache hit rate {:.1}%)",
        table.len(),
        path.display(),
        stats.hit_rate() * 100.0,
    );
    Ok(())
}
