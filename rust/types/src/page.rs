use serde::{Deserialize, Serialize};

/// A raw page as emitted by the XML splitter, before any wikitext parsing.
///
/// Pages are immutable once emitted and are consumed exactly once by the
/// wikitext parser. The `timestamp` is the dump's ISO-8601 revision time,
/// kept verbatim until record construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawPage {
    pub title: String,
    pub id: u64,
    pub namespace: i32,
    pub wikitext: String,
    pub timestamp: String,
    pub redirect: Option<String>,
}

impl RawPage {
    /// Main (article) namespace pages are the only ones the classifier and
    /// writer care about; other namespaces are passed through for callers
    /// to filter.
    pub fn is_article(&self) -> bool {
        self.namespace == 0
    }
}
