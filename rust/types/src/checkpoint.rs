use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ArticleType;

pub const CHECKPOINT_FILE_NAME: &str = ".ingest-checkpoint.json";

/// A resumption record, written atomically every `checkpoint_interval`
/// records. `last_article_id` is monotonic across saves; resume is valid
/// only when `dump_url` matches the checkpointed one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub dump_url: String,
    pub articles_processed: u64,
    pub last_article_id: u64,
    pub last_article_title: String,
    pub articles_by_type: BTreeMap<ArticleType, u64>,
    pub bytes_downloaded: u64,
    pub started_at: DateTime<Utc>,
    pub checkpointed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn matches_source(&self, dump_url: &str) -> bool {
        self.dump_url == dump_url
    }
}
