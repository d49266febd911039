use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use tome_ingest::config::DEFAULT_CONFIG_PATH;
use tome_ingest::{IngestConfig, IngestPipeline, ProgressReport};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Config file; environment variables override it.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
    #[arg(long)]
    pub dump_url: Option<String>,
    #[arg(long)]
    pub data_dir: Option<String>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub checkpoint_interval: Option<u64>,
    /// Stop after this many articles.
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub generate_embeddings: bool,
    /// Embedding model (bge-m3, gemma, gemma300).
    #[arg(long)]
    pub model: Option<String>,
}

pub async fn ingest(args: IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match IngestConfig::load_from_path(&args.config) {
        Ok(config) => config,
        Err(_) => match (&args.dump_url, &args.data_dir) {
            (Some(dump_url), Some(data_dir)) => IngestConfig::new(dump_url, data_dir),
            _ => {
                eprintln!("usage: provide --dump-url and --data-dir, or a config file");
                std::process::exit(2);
            }
        },
    };
    if let Some(dump_url) = args.dump_url {
        config.dump_url = dump_url;
    }
    if let Some(data_dir) = args.data_dir {
        config.output_dir = data_dir;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(interval) = args.checkpoint_interval {
        config.checkpoint_interval = interval;
    }
    if let Some(limit) = args.limit {
        config.limit = Some(limit);
    }
    if args.generate_embeddings {
        config.generate_embeddings = true;
    }
    if let Some(model) = args.model {
        config.embeddings_model = model.parse()?;
    }

    let mut pipeline = IngestPipeline::new(config)?;

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, draining pipeline");
            cancel.cancel();
        }
    });

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static progress template"),
    );
    let progress_bar = bar.clone();
    pipeline.set_progress_callback(Arc::new(move |report: &ProgressReport| {
        progress_bar.set_message(format!(
            "{} articles ({:.0}/s, {} MiB downloaded)",
            report.articles_processed,
            report.articles_per_second,
            report.bytes_downloaded / (1024 * 1024),
        ));
        progress_bar.tick();
    }));

    let outcome = pipeline.run().await?;
    bar.finish_and_clear();

    println!(
        "ingested {} articles ({} skipped, {} embedding failures){}",
        outcome.articles_processed,
        outcome.skipped,
        outcome.embedding_errors,
        if outcome.aborted { " [interrupted]" } else { "" },
    );
    for (article_type, count) in &outcome.manifest.articles_by_type {
        println!("  {article_type}: {count}");
    }
    if !outcome.recent_errors.is_empty() {
        println!("recent per-record errors ({}):", outcome.recent_errors.len());
        for error in outcome.recent_errors.iter().take(10) {
            println!("  {error}");
        }
    }
    Ok(())
}
