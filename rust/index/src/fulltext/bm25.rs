//! Inverted postings with BM25 scoring.
//!
//! Term frequencies carry a per-field weight at indexing time (a flattened
//! BM25F): a title hit counts `title_weight` times a body hit. Postings
//! keep positions for explainability; scoring never needs them.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tome_types::ArticleType;

use crate::fulltext::tokenizer::Bm25Tokenizer;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bm25Config {
    #[serde(default = "Bm25Config::default_k1")]
    pub k1: f32,
    #[serde(default = "Bm25Config::default_b")]
    pub b: f32,
    #[serde(default = "Bm25Config::default_title_weight")]
    pub title_weight: f32,
    #[serde(default = "Bm25Config::default_content_weight")]
    pub content_weight: f32,
}

impl Bm25Config {
    fn default_k1() -> f32 {
        1.2
    }

    fn default_b() -> f32 {
        0.75
    }

    fn default_title_weight() -> f32 {
        2.5
    }

    fn default_content_weight() -> f32 {
        1.0
    }
}

impl Default for Bm25Config {
    fn default() -> Self {
        Bm25Config {
            k1: Self::default_k1(),
            b: Self::default_b(),
            title_weight: Self::default_title_weight(),
            content_weight: Self::default_content_weight(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Posting {
    doc: u32,
    term_frequency: f32,
    positions: Vec<u32>,
}

#[derive(Clone, Debug)]
struct DocEntry {
    doc_id: String,
    article_type: Option<ArticleType>,
    length: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bm25Match {
    pub doc_id: String,
    pub score: f32,
    pub matched_terms: Vec<String>,
    pub article_type: Option<ArticleType>,
}

pub struct Bm25Index {
    config: Bm25Config,
    tokenizer: Bm25Tokenizer,
    postings: HashMap<String, Vec<Posting>>,
    docs: Vec<DocEntry>,
    total_length: f64,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(Bm25Config::default())
    }
}

impl Bm25Index {
    pub fn new(config: Bm25Config) -> Self {
        Bm25Index {
            config,
            tokenizer: Bm25Tokenizer::default(),
            postings: HashMap::new(),
            docs: Vec::new(),
            total_length: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn add_document(
        &mut self,
        doc_id: impl Into<String>,
        title: &str,
        content: &str,
        article_type: Option<ArticleType>,
    ) {
        let doc = self.docs.len() as u32;
        let mut weighted_frequencies: HashMap<String, (f32, Vec<u32>)> = HashMap::new();
        let mut position = 0u32;
        let mut weighted_length = 0.0f32;

        for (text, weight) in [
            (title, self.config.title_weight),
            (content, self.config.content_weight),
        ] {
            for token in self.tokenizer.tokenize(text) {
                let slot = weighted_frequencies.entry(token).or_insert((0.0, Vec::new()));
                slot.0 += weight;
                slot.1.push(position);
                position += 1;
                weighted_length += weight;
            }
        }

        for (term, (term_frequency, positions)) in weighted_frequencies {
            self.postings.entry(term).or_default().push(Posting {
                doc,
                term_frequency,
                positions,
            });
        }
        self.docs.push(DocEntry {
            doc_id: doc_id.into(),
            article_type,
            length: weighted_length,
        });
        self.total_length += weighted_length as f64;
    }

    fn average_length(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            (self.total_length / self.docs.len() as f64) as f32
        }
    }

    fn idf(&self, document_frequency: usize) -> f32 {
        let n = self.docs.len() as f32;
        let df = document_frequency as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Top-k documents by BM25 score, with the query terms each document
    /// matched.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        types: Option<&[ArticleType]>,
    ) -> Vec<Bm25Match> {
        let terms: BTreeSet<String> = self.tokenizer.tokenize(query).into_iter().collect();
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }
        let average_length = self.average_length().max(f32::EPSILON);
        let (k1, b) = (self.config.k1, self.config.b);

        let mut scores: HashMap<u32, (f32, Vec<String>)> = HashMap::new();
        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(postings.len());
            for posting in postings {
                let doc = &self.docs[posting.doc as usize];
                let tf = posting.term_frequency;
                let norm = k1 * (1.0 - b + b * doc.length / average_length);
                let contribution = idf * (tf * (k1 + 1.0)) / (tf + norm);
                let slot = scores.entry(posting.doc).or_insert((0.0, Vec::new()));
                slot.0 += contribution;
                slot.1.push(term.clone());
            }
        }

        let mut matches: Vec<Bm25Match> = scores
            .into_iter()
            .filter_map(|(doc, (score, matched_terms))| {
                let entry = &self.docs[doc as usize];
                if let Some(types) = types {
                    match entry.article_type {
                        Some(t) if types.contains(&t) => {}
                        _ => return None,
                    }
                }
                Some(Bm25Match {
                    doc_id: entry.doc_id.clone(),
                    score,
                    matched_terms,
                    article_type: entry.article_type,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        matches.truncate(k);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_docs() -> Bm25Index {
        let mut index = Bm25Index::default();
        index.add_document(
            "einstein",
            "Albert Einstein",
            "German physicist who developed the theory of relativity.",
            Some(ArticleType::Person),
        );
        index.add_document(
            "tokyo",
            "Tokyo",
            "Capital city of Japan, the most populous metropolis in the world.",
            Some(ArticleType::Place),
        );
        index.add_document(
            "relativity",
            "Theory of relativity",
            "Physics theory proposed by Einstein about space and time.",
            Some(ArticleType::Work),
        );
        index
    }

    #[test]
    fn query_terms_drive_ranking() {
        let index = index_with_docs();
        let matches = index.search("relativity theory", 10, None);
        assert_eq!(matches.len(), 2);
        // Title hits outrank body hits.
        assert_eq!(matches[0].doc_id, "relativity");
        assert!(matches[0].score > matches[1].score);
    }

    #[test]
    fn matched_terms_are_reported() {
        let index = index_with_docs();
        let matches = index.search("einstein physics", 10, None);
        let top = matches.iter().find(|m| m.doc_id == "relativity").unwrap();
        let mut terms = top.matched_terms.clone();
        terms.sort();
        assert_eq!(terms, vec!["einstein".to_string(), "physic".to_string()]);
    }

    #[test]
    fn type_filter_applies() {
        let index = index_with_docs();
        let matches = index.search("einstein", 10, Some(&[ArticleType::Person]));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].doc_id, "einstein");
    }

    #[test]
    fn stemming_matches_inflected_queries() {
        let index = index_with_docs();
        let matches = index.search("theories", 10, None);
        assert!(!matches.is_empty());
    }

    #[test]
    fn empty_query_and_empty_index_return_nothing() {
        assert!(index_with_docs().search("", 10, None).is_empty());
        assert!(Bm25Index::default().search("anything", 10, None).is_empty());
    }

    #[test]
    fn k_caps_results() {
        let index = index_with_docs();
        assert_eq!(index.search("the of in", 10, None).len(), 0);
        let matches = index.search("einstein relativity", 1, None);
        assert_eq!(matches.len(), 1);
    }
}
