//! End-to-end pipeline scenarios against small synthetic dumps.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tome_ingest::checkpoint;
use tome_ingest::reader::ArchiveReader;
use tome_ingest::{IngestConfig, IngestPipeline};
use tome_storage::Storage;
use tome_types::{ArticleType, Checkpoint};

fn page(id: u64, title: &str, wikitext: &str) -> String {
    format!(
        "  <page>\n    <title>{title}</title>\n    <ns>0</ns>\n    <id>{id}</id>\n    \
         <revision>\n      <timestamp>2024-05-01T12:00:00Z</timestamp>\n      \
         <text>{wikitext}</text>\n    </revision>\n  </page>\n"
    )
}

fn dump(pages: &[String]) -> Vec<u8> {
    let mut xml = String::from("<mediawiki>\n");
    for p in pages {
        xml.push_str(p);
    }
    xml.push_str("</mediawiki>\n");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn write_dump(dir: &std::path::Path, pages: &[String]) -> String {
    let path = dir.join("dump.xml.gz");
    std::fs::write(&path, dump(pages)).unwrap();
    path.to_string_lossy().into_owned()
}

fn three_page_dump(dir: &std::path::Path) -> String {
    write_dump(
        dir,
        &[
            page(
                1,
                "Albert Einstein",
                "{{Infobox scientist|name=Albert Einstein|birth_date=14 March 1879}} \
                 German-born theoretical physicist.",
            ),
            page(
                2,
                "Tokyo",
                "{{Infobox settlement|name=Tokyo|coordinates=35.6762, 139.6503\
                 |population=37400068}} Capital of Japan.",
            ),
            page(3, "Redirect", "#REDIRECT [[Tokyo]]"),
        ],
    )
}

#[tokio::test]
async fn three_page_dump_produces_partitioned_archive() {
    let dump_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let dump_url = three_page_dump(dump_dir.path());

    let mut config = IngestConfig::new(&dump_url, out_dir.path().to_string_lossy());
    config.batch_size = 10;
    config.skip_redirects = true;
    let mut pipeline = IngestPipeline::new(config).unwrap();
    let outcome = pipeline.run().await.unwrap();

    assert!(!outcome.aborted);
    assert_eq!(outcome.articles_processed, 2);
    assert_eq!(outcome.manifest.total_articles, 2);
    assert_eq!(
        outcome.manifest.articles_by_type.get(&ArticleType::Person),
        Some(&1)
    );
    assert_eq!(
        outcome.manifest.articles_by_type.get(&ArticleType::Place),
        Some(&1)
    );
    assert!(out_dir.path().join("data/person/person.0.parquet").exists());
    assert!(out_dir.path().join("data/place/place.0.parquet").exists());
    assert!(out_dir.path().join("manifest.json").exists());

    let reader = ArchiveReader::open(Storage::new_local(out_dir.path()))
        .await
        .unwrap();
    let tokyo = reader.get_by_title("tokyo").await.unwrap().unwrap();
    assert_eq!(tokyo.article_type, Some(ArticleType::Place));
    assert!((tokyo.coords_lat.unwrap() - 35.6762).abs() < 1e-3);
    assert!((tokyo.coords_lon.unwrap() - 139.6503).abs() < 1e-3);
    assert!(tokyo.infobox_json.unwrap().contains("37400068"));
    assert!(reader.get_by_title("Redirect").await.unwrap().is_none());
}

#[tokio::test]
async fn empty_dump_still_publishes_manifest_and_indexes() {
    let dump_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let dump_url = write_dump(dump_dir.path(), &[]);

    let config = IngestConfig::new(&dump_url, out_dir.path().to_string_lossy());
    let mut pipeline = IngestPipeline::new(config).unwrap();
    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.manifest.total_articles, 0);
    assert!(outcome.manifest.data_files.is_empty());
    for index in ["titles.json.gz", "types.json.gz", "ids.json.gz"] {
        assert!(out_dir.path().join("indexes").join(index).exists());
    }
}

fn twenty_page_dump(dir: &std::path::Path) -> String {
    let pages: Vec<String> = (1..=20)
        .map(|id| {
            if id % 2 == 0 {
                page(
                    id,
                    &format!("City {id}"),
                    &format!("{{{{Infobox settlement|name=City {id}}}}} A city."),
                )
            } else {
                page(
                    id,
                    &format!("Person {id}"),
                    &format!("{{{{Infobox person|name=Person {id}}}}} A person."),
                )
            }
        })
        .collect();
    write_dump(dir, &pages)
}

#[tokio::test]
async fn http_resume_reissues_ranged_request_from_checkpoint() {
    // An uncompressed dump split at a page boundary: the first half is
    // already ingested per the checkpoint, so the resumed run must ask
    // the server for `bytes=<offset>-` and only parse the tail.
    let mut head = String::from("<mediawiki>\n");
    for id in 1..=10u64 {
        head.push_str(&page(
            id,
            &format!("Person {id}"),
            &format!("{{{{Infobox person|name=Person {id}}}}} A person."),
        ));
    }
    let mut tail = String::new();
    for id in 11..=20u64 {
        tail.push_str(&page(
            id,
            &format!("City {id}"),
            &format!("{{{{Infobox settlement|name=City {id}}}}} A city."),
        ));
    }
    tail.push_str("</mediawiki>\n");
    let offset = head.len() as u64;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (range_tx, range_rx) = tokio::sync::oneshot::channel::<String>();
    let body = tail.clone();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let request = String::from_utf8_lossy(&request).into_owned();
        let range = request
            .lines()
            .find_map(|line| {
                line.strip_prefix("Range: ")
                    .or_else(|| line.strip_prefix("range: "))
            })
            .unwrap_or("")
            .to_string();
        let _ = range_tx.send(range);
        let response = format!(
            "HTTP/1.1 206 Partial Content\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body,
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });

    let out_dir = tempfile::tempdir().unwrap();
    let dump_url = format!("http://{addr}/enwiki.xml");
    let storage = Storage::new_local(out_dir.path());
    checkpoint::save(
        &storage,
        &Checkpoint {
            dump_url: dump_url.clone(),
            articles_processed: 10,
            last_article_id: 10,
            last_article_title: "Person 10".to_string(),
            articles_by_type: BTreeMap::from([(ArticleType::Person, 10u64)]),
            bytes_downloaded: offset,
            started_at: Utc::now(),
            checkpointed_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    let mut config = IngestConfig::new(&dump_url, out_dir.path().to_string_lossy());
    config.batch_size = 4;
    let mut pipeline = IngestPipeline::new(config).unwrap();
    let outcome = pipeline.run().await.unwrap();

    assert_eq!(range_rx.await.unwrap(), format!("bytes={offset}-"));
    assert_eq!(outcome.articles_processed, 20);
    assert_eq!(
        outcome.manifest.articles_by_type.get(&ArticleType::Person),
        Some(&10)
    );
    assert_eq!(
        outcome.manifest.articles_by_type.get(&ArticleType::Place),
        Some(&10)
    );
}

#[tokio::test]
async fn resume_after_interruption_matches_single_run() {
    let dump_dir = tempfile::tempdir().unwrap();
    let dump_url = twenty_page_dump(dump_dir.path());

    // One uninterrupted run.
    let full_dir = tempfile::tempdir().unwrap();
    let mut config = IngestConfig::new(&dump_url, full_dir.path().to_string_lossy());
    config.batch_size = 4;
    config.checkpoint_interval = 4;
    let full = IngestPipeline::new(config.clone()).unwrap().run().await.unwrap();

    // The same dump, stopped after ten articles and restarted.
    let split_dir = tempfile::tempdir().unwrap();
    let mut first_half = IngestConfig::new(&dump_url, split_dir.path().to_string_lossy());
    first_half.batch_size = 4;
    first_half.checkpoint_interval = 4;
    first_half.limit = Some(10);
    let partial = IngestPipeline::new(first_half.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(partial.articles_processed, 10);

    let mut second_half = first_half.clone();
    second_half.limit = None;
    let resumed = IngestPipeline::new(second_half).unwrap().run().await.unwrap();

    assert_eq!(resumed.articles_processed, full.articles_processed);
    assert_eq!(
        resumed.manifest.articles_by_type,
        full.manifest.articles_by_type
    );
    assert_eq!(
        resumed.manifest.articles_by_type.get(&ArticleType::Person),
        Some(&10)
    );

    // The same article ids are present in both archives.
    let full_reader = ArchiveReader::open(Storage::new_local(full_dir.path()))
        .await
        .unwrap();
    let resumed_reader = ArchiveReader::open(Storage::new_local(split_dir.path()))
        .await
        .unwrap();
    for id in 1..=20u64 {
        let id = id.to_string();
        assert!(full_reader.get_by_id(&id).await.unwrap().is_some(), "id {id} in full run");
        assert!(
            resumed_reader.get_by_id(&id).await.unwrap().is_some(),
            "id {id} after resume"
        );
    }
}
