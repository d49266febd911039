use std::collections::HashSet;
use std::sync::LazyLock;

use rust_stemmers::{Algorithm, Stemmer};

/// English stopwords filtered before stemming. Derived from NLTK's list.
const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me",
    "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only",
    "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should",
    "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "you", "your", "yours", "yourself", "yourselves",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ENGLISH_STOPWORDS.iter().copied().collect());

/// Standard BM25 tokenizer with stemming and stopword filtering.
///
/// Processing pipeline:
/// 1. Replace non-alphanumeric characters with spaces
/// 2. Lowercase and split on whitespace
/// 3. Filter stopwords and overlong tokens
/// 4. Apply Snowball stemming
pub struct Bm25Tokenizer {
    stemmer: Stemmer,
    stopwords: HashSet<&'static str>,
    token_max_length: usize,
}

impl Default for Bm25Tokenizer {
    fn default() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            stopwords: STOPWORDS.clone(),
            token_max_length: 40,
        }
    }
}

impl Bm25Tokenizer {
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let cleaned: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() || c == '_' {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        let mut result = Vec::new();
        for token in cleaned.to_lowercase().split_whitespace() {
            if self.stopwords.contains(token) {
                continue;
            }
            if token.len() > self.token_max_length {
                continue;
            }
            let stemmed = self.stemmer.stem(token).to_string();
            if !stemmed.is_empty() {
                result.push(stemmed);
            }
        }
        result
    }
}
