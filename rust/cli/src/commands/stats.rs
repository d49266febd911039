use clap::Args;

use tome_ingest::manifest;
use tome_storage::Storage;

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[arg(long)]
    pub data_dir: String,
}

pub async fn stats(args: StatsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::new_local(&args.data_dir);
    let manifest = manifest::load(&storage).await?;

    println!("archive: {}", args.data_dir);
    println!("source: {}", manifest.source_url);
    println!("created: {}", manifest.created_at.to_rfc3339());
    println!("articles: {}", manifest.total_articles);
    for (article_type, count) in &manifest.articles_by_type {
        println!("  {article_type}: {count}");
    }
    println!(
        "data files: {} ({:.1} MiB)",
        manifest.data_files.len(),
        manifest.total_bytes() as f64 / (1024.0 * 1024.0),
    );
    println!(
        "index files: titles, types, ids, {} blooms{}{}",
        manifest.index_files.bloom.len(),
        if manifest.index_files.lookup_table.is_some() {
            ", lookup table"
        } else {
            ""
        },
        if manifest.index_files.vectors.is_some() {
            ", vectors"
        } else {
            ""
        },
    );
    Ok(())
}
