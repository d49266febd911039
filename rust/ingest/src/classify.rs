//! Deterministic article classification.
//!
//! Two passes: an exact map over normalized infobox template names, then
//! keyword buckets over categories. Both tables are configuration data
//! with curated defaults; the code never hardcodes a taxonomy decision
//! outside them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tome_types::{ArticleType, ClassifiedArticle, ParsedArticle};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Normalized infobox name (lowercased, `infobox ` prefix stripped)
    /// to article type. First matching infobox wins.
    #[serde(default = "ClassifierRules::default_infobox_map")]
    pub infobox_map: BTreeMap<String, ArticleType>,
    /// Case-insensitive substring keys scanned against categories in
    /// order. First match wins.
    #[serde(default = "ClassifierRules::default_category_buckets")]
    pub category_buckets: Vec<(String, ArticleType)>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        ClassifierRules {
            infobox_map: Self::default_infobox_map(),
            category_buckets: Self::default_category_buckets(),
        }
    }
}

impl ClassifierRules {
    fn default_infobox_map() -> BTreeMap<String, ArticleType> {
        let entries: [(&str, ArticleType); 38] = [
            ("person", ArticleType::Person),
            ("scientist", ArticleType::Person),
            ("officeholder", ArticleType::Person),
            ("military person", ArticleType::Person),
            ("writer", ArticleType::Person),
            ("musical artist", ArticleType::Person),
            ("football biography", ArticleType::Person),
            ("sportsperson", ArticleType::Person),
            ("artist", ArticleType::Person),
            ("royalty", ArticleType::Person),
            ("settlement", ArticleType::Place),
            ("country", ArticleType::Place),
            ("city", ArticleType::Place),
            ("river", ArticleType::Place),
            ("mountain", ArticleType::Place),
            ("islands", ArticleType::Place),
            ("protected area", ArticleType::Place),
            ("body of water", ArticleType::Place),
            ("building", ArticleType::Place),
            ("station", ArticleType::Place),
            ("company", ArticleType::Org),
            ("organization", ArticleType::Org),
            ("university", ArticleType::Org),
            ("school", ArticleType::Org),
            ("political party", ArticleType::Org),
            ("football club", ArticleType::Org),
            ("government agency", ArticleType::Org),
            ("film", ArticleType::Work),
            ("album", ArticleType::Work),
            ("book", ArticleType::Work),
            ("television", ArticleType::Work),
            ("video game", ArticleType::Work),
            ("song", ArticleType::Work),
            ("military conflict", ArticleType::Event),
            ("civilian attack", ArticleType::Event),
            ("earthquake", ArticleType::Event),
            ("election", ArticleType::Event),
            ("festival", ArticleType::Event),
        ];
        entries
            .into_iter()
            .map(|(name, article_type)| (name.to_string(), article_type))
            .collect()
    }

    fn default_category_buckets() -> Vec<(String, ArticleType)> {
        let entries: [(&str, ArticleType); 22] = [
            ("births", ArticleType::Person),
            ("deaths", ArticleType::Person),
            ("living people", ArticleType::Person),
            ("cities", ArticleType::Place),
            ("towns", ArticleType::Place),
            ("villages", ArticleType::Place),
            ("municipalities", ArticleType::Place),
            ("populated places", ArticleType::Place),
            ("countries", ArticleType::Place),
            ("rivers", ArticleType::Place),
            ("mountains", ArticleType::Place),
            ("companies", ArticleType::Org),
            ("organizations", ArticleType::Org),
            ("universities", ArticleType::Org),
            ("films", ArticleType::Work),
            ("albums", ArticleType::Work),
            ("books", ArticleType::Work),
            ("novels", ArticleType::Work),
            ("video games", ArticleType::Work),
            ("wars", ArticleType::Event),
            ("battles", ArticleType::Event),
            ("earthquakes", ArticleType::Event),
        ];
        entries
            .into_iter()
            .map(|(keyword, article_type)| (keyword.to_string(), article_type))
            .collect()
    }
}

pub struct Classifier {
    rules: ClassifierRules,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierRules::default())
    }
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Classifier { rules }
    }

    /// Pure function of `(infoboxes, categories)`.
    pub fn classify(&self, article: &ParsedArticle) -> ArticleType {
        for infobox in &article.infoboxes {
            let name = normalize_template_name(&infobox.kind);
            if let Some(&article_type) = self.rules.infobox_map.get(name.as_str()) {
                return article_type;
            }
        }
        for category in &article.categories {
            let category = category.to_lowercase();
            for (keyword, article_type) in &self.rules.category_buckets {
                if category.contains(keyword.as_str()) {
                    return *article_type;
                }
            }
        }
        ArticleType::Other
    }

    pub fn classify_into(&self, article: ParsedArticle) -> ClassifiedArticle {
        let article_type = self.classify(&article);
        ClassifiedArticle {
            article,
            article_type,
        }
    }
}

/// Lowercase and strip a leading `infobox ` so both raw template names and
/// the parser's pre-stripped kinds land on the same key.
fn normalize_template_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    lower.strip_prefix("infobox").map(|rest| rest.trim().to_string()).unwrap_or(lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tome_types::Infobox;

    fn article(infobox: Option<&str>, categories: &[&str]) -> ParsedArticle {
        ParsedArticle {
            title: "T".to_string(),
            id: 1,
            namespace: 0,
            timestamp: String::new(),
            redirect: None,
            plaintext: String::new(),
            infoboxes: infobox
                .map(|kind| {
                    vec![Infobox {
                        kind: kind.to_string(),
                        fields: BTreeMap::new(),
                    }]
                })
                .unwrap_or_default(),
            links: Vec::new(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            is_redirect: false,
            is_disambiguation: false,
        }
    }

    #[test]
    fn infobox_map_wins_over_categories() {
        let classifier = Classifier::default();
        let a = article(Some("scientist"), &["1879 births"]);
        assert_eq!(classifier.classify(&a), ArticleType::Person);
        let b = article(Some("settlement"), &["1879 births"]);
        assert_eq!(classifier.classify(&b), ArticleType::Place);
    }

    #[test]
    fn raw_template_names_normalize() {
        let classifier = Classifier::default();
        let a = article(Some("Infobox Scientist"), &[]);
        assert_eq!(classifier.classify(&a), ArticleType::Person);
    }

    #[test]
    fn category_buckets_catch_unmapped_infoboxes() {
        let classifier = Classifier::default();
        let a = article(Some("obscure thing"), &["Cities in Japan"]);
        assert_eq!(classifier.classify(&a), ArticleType::Place);
        let b = article(None, &["American films"]);
        assert_eq!(classifier.classify(&b), ArticleType::Work);
    }

    #[test]
    fn unmatched_articles_are_other() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(&article(None, &[])), ArticleType::Other);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::default();
        let a = article(Some("film"), &["1994 films", "Living people"]);
        let first = classifier.classify(&a);
        for _ in 0..10 {
            assert_eq!(classifier.classify(&a), first);
        }
    }
}
