use clap::Args;

use tome_index::fulltext::Bm25Index;
use tome_index::geo::{GeoIndex, NearOptions};
use tome_ingest::manifest;
use tome_ingest::reader::{scan_file, ArchiveReader, ArticleRow};
use tome_storage::Storage;
use tome_types::ArticleType;

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(long)]
    pub data_dir: String,
    /// Exact title lookup through the bloom-gated index.
    #[arg(long)]
    pub title: Option<String>,
    /// Article id lookup.
    #[arg(long)]
    pub id: Option<String>,
    /// Full-text BM25 search over title and content.
    #[arg(long)]
    pub search: Option<String>,
    /// `lat,lng` pair for a radius search.
    #[arg(long)]
    pub near: Option<String>,
    /// Radius in meters for --near.
    #[arg(long, default_value_t = 10_000.0)]
    pub radius: f64,
    /// Restrict results to one article type.
    #[arg(long)]
    pub r#type: Option<String>,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

pub async fn query(args: QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::new_local(&args.data_dir);
    let type_filter: Option<ArticleType> = match &args.r#type {
        Some(t) => Some(t.parse()?),
        None => None,
    };

    if let Some(title) = &args.title {
        let reader = ArchiveReader::open(storage).await?;
        match reader.get_by_title(title).await? {
            Some(row) => print_row(&row),
            None => println!("no article titled {title:?}"),
        }
        return Ok(());
    }

    if let Some(id) = &args.id {
        let reader = ArchiveReader::open(storage).await?;
        match reader.get_by_id(id).await? {
            Some(row) => print_row(&row),
            None => println!("no article with id {id}"),
        }
        return Ok(());
    }

    if let Some(search) = &args.search {
        let rows = all_rows(&storage).await?;
        let mut index = Bm25Index::default();
        for row in &rows {
            index.add_document(row.id.clone(), &row.title, &row.content, row.article_type);
        }
        let types = type_filter.map(|t| vec![t]);
        let matches = index.search(search, args.limit, types.as_deref());
        if matches.is_empty() {
            println!("no matches");
        }
        for m in matches {
            let title = rows
                .iter()
                .find(|r| r.id == m.doc_id)
                .map(|r| r.title.as_str())
                .unwrap_or("?");
            println!(
                "{:.3}  {} ({}) matched {}",
                m.score,
                title,
                m.doc_id,
                m.matched_terms.join(", "),
            );
        }
        return Ok(());
    }

    if let Some(near) = &args.near {
        let Some((lat, lng)) = near
            .split_once(',')
            .and_then(|(a, b)| Some((a.trim().parse().ok()?, b.trim().parse().ok()?)))
        else {
            eprintln!("usage: --near LAT,LNG");
            std::process::exit(2);
        };
        let rows = all_rows(&storage).await?;
        let mut index = GeoIndex::default();
        for row in &rows {
            if let (Some(coord_lat), Some(coord_lon), Some(article_type)) =
                (row.coords_lat, row.coords_lon, row.article_type)
            {
                index.insert(row.id.clone(), coord_lat as f64, coord_lon as f64, article_type)?;
            }
        }
        let matches = index.near(
            lat,
            lng,
            &NearOptions {
                max_distance: args.radius,
                min_distance: None,
                limit: Some(args.limit),
                types: type_filter.map(|t| vec![t]),
            },
        )?;
        if matches.is_empty() {
            println!("nothing within {:.0} m", args.radius);
        }
        for m in matches {
            println!("{:>8.0} m  article {}", m.distance_meters, m.entry.article_id);
        }
        return Ok(());
    }

    eprintln!("usage: one of --title, --id, --search, --near is required");
    std::process::exit(2);
}

async fn all_rows(storage: &Storage) -> Result<Vec<ArticleRow>, Box<dyn std::error::Error>> {
    let manifest = manifest::load(storage).await?;
    let mut rows = Vec::new();
    for file in &manifest.data_files {
        rows.extend(scan_file(storage, &file.path).await?.into_iter().map(|(row, _, _)| row));
    }
    Ok(rows)
}

fn print_row(row: &ArticleRow) {
    println!("{} ({})", row.title, row.id);
    if let Some(article_type) = row.article_type {
        println!("type: {article_type}");
    }
    if let (Some(lat), Some(lon)) = (row.coords_lat, row.coords_lon) {
        println!("coords: {lat}, {lon}");
    }
    if !row.description.is_empty() {
        println!("{}", row.description);
    }
}
