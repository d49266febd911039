mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::build_indexes::{build_indexes, BuildIndexesArgs};
use crate::commands::embed::{embed, EmbedArgs};
use crate::commands::ingest::{ingest, IngestArgs};
use crate::commands::query::{query, QueryArgs};
use crate::commands::stats::{stats, StatsArgs};

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a Wikipedia dump into a partitioned archive.
    Ingest(IngestArgs),
    /// Build the embedding lookup table for an archive.
    Embed(EmbedArgs),
    /// Rebuild the title/type/id/bloom indexes from the data files.
    BuildIndexes(BuildIndexesArgs),
    /// Query an archive by title, id, full text, or location.
    Query(QueryArgs),
    /// Summarize an archive's manifest.
    Stats(StatsArgs),
}

#[derive(Parser, Debug)]
#[command(name = "tome")]
#[command(version = "0.1.0")]
#[command(about = "Wikipedia dumps to a queryable columnar archive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TOME_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Ingest(args) => ingest(args).await,
        Command::Embed(args) => embed(args).await,
        Command::BuildIndexes(args) => build_indexes(args).await,
        Command::Query(args) => query(args).await,
        Command::Stats(args) => stats(args).await,
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
