use clap::Args;

use tome_ingest::indexes::ArchiveIndexBuilder;
use tome_ingest::manifest;
use tome_ingest::reader::scan_file;
use tome_ingest::writer::{RowLocation, WrittenFile};
use tome_storage::Storage;

#[derive(Args, Debug)]
pub struct BuildIndexesArgs {
    #[arg(long)]
    pub data_dir: String,
}

/// Rebuild titles/types/ids/bloom from the shard files named in the
/// manifest, for archives whose index files were lost or corrupted.
pub async fn build_indexes(args: BuildIndexesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::new_local(&args.data_dir);
    let manifest = manifest::load(&storage).await?;
    let mut builder = ArchiveIndexBuilder::default();

    for file in &manifest.data_files {
        let rows = scan_file(&storage, &file.path).await?;
        let written = WrittenFile {
            file: file.clone(),
            rows: rows
                .into_iter()
                .map(|(row, row_group, row_index)| RowLocation {
                    id: row.id,
                    title: row.title,
                    row_group,
                    row: row_index,
                })
                .collect(),
        };
        builder.add_file(&written);
        tracing::info!(path = %file.path, "indexed shard file");
    }

    let index_files = builder.finalize(&storage).await?;
    println!(
        "rebuilt indexes for {} files ({} blooms)",
        manifest.data_files.len(),
        index_files.bloom.len(),
    );
    Ok(())
}
