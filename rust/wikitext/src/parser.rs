use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use tome_types::{ParsedArticle, RawPage, WikiLink};

use crate::infobox::extract_infoboxes;
use crate::text::plaintext_of;

/// Template names treated as disambiguation markers. Curated data, not
/// grammar: deployments extend it through [`ParserOptions`].
pub const DEFAULT_DISAMBIGUATION_TEMPLATES: &[&str] = &[
    "disambiguation",
    "disambig",
    "disamb",
    "dab",
    "hndis",
    "geodis",
    "numberdis",
    "letter-number combination disambiguation",
    "mathdab",
    "roaddis",
    "shipindex",
];

static REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*#redirect\s*:?\s*\[\[([^\]|#]+)").expect("static regex"));
static CATEGORY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[\s*category\s*:\s*([^\]|]+)").expect("static regex"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]|:#]+)(?:\|([^\]]*))?\]\]").expect("static regex"));
static TEMPLATE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^|}\n]+)").expect("static regex"));
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParserOptions {
    #[serde(default = "ParserOptions::default_disambiguation_templates")]
    pub disambiguation_templates: Vec<String>,
}

impl ParserOptions {
    fn default_disambiguation_templates() -> Vec<String> {
        DEFAULT_DISAMBIGUATION_TEMPLATES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            disambiguation_templates: Self::default_disambiguation_templates(),
        }
    }
}

/// Best-effort wikitext decomposition. Never panics on malformed input and
/// is deterministic for identical input.
pub struct WikitextParser {
    options: ParserOptions,
}

impl Default for WikitextParser {
    fn default() -> Self {
        Self::new(ParserOptions::default())
    }
}

impl WikitextParser {
    pub fn new(options: ParserOptions) -> Self {
        WikitextParser { options }
    }

    pub fn parse(&self, raw: RawPage) -> ParsedArticle {
        let wikitext = COMMENT.replace_all(&raw.wikitext, "").into_owned();
        let mut article = ParsedArticle::from_raw(raw);

        if let Some(captures) = REDIRECT.captures(&wikitext) {
            article.is_redirect = true;
            article.redirect = Some(captures[1].trim().to_string());
            return article;
        }

        article.infoboxes = extract_infoboxes(&wikitext);
        article.categories = CATEGORY
            .captures_iter(&wikitext)
            .map(|c| c[1].trim().to_string())
            .collect();
        article.links = LINK
            .captures_iter(&wikitext)
            .map(|c| {
                let page = c[1].trim().to_string();
                let text = c
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| page.clone());
                WikiLink { page, text }
            })
            .collect();
        article.is_disambiguation = self.is_disambiguation(&wikitext);
        article.plaintext = plaintext_of(&wikitext);
        article
    }

    fn is_disambiguation(&self, wikitext: &str) -> bool {
        TEMPLATE_NAME.captures_iter(wikitext).any(|c| {
            let name = c[1].trim().to_lowercase();
            self.options
                .disambiguation_templates
                .iter()
                .any(|t| t == &name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(wikitext: &str) -> RawPage {
        RawPage {
            title: "Test".to_string(),
            id: 1,
            namespace: 0,
            wikitext: wikitext.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            redirect: None,
        }
    }

    #[test]
    fn detects_redirects() {
        let parser = WikitextParser::default();
        let article = parser.parse(page("#REDIRECT [[Tokyo]]"));
        assert!(article.is_redirect);
        assert_eq!(article.redirect.as_deref(), Some("Tokyo"));
        assert!(article.validate().is_ok());
    }

    #[test]
    fn redirect_is_case_insensitive_with_leading_space() {
        let parser = WikitextParser::default();
        let article = parser.parse(page("  #redirect: [[Some Page#Section]]"));
        assert!(article.is_redirect);
        assert_eq!(article.redirect.as_deref(), Some("Some Page"));
    }

    #[test]
    fn collects_categories_and_links() {
        let parser = WikitextParser::default();
        let article = parser.parse(page(
            "Born in [[Ulm]]. Worked on [[Physics|theoretical physics]].\n\
             [[Category:1879 births]]\n[[Category:German physicists]]",
        ));
        assert_eq!(
            article.categories,
            vec!["1879 births".to_string(), "German physicists".to_string()]
        );
        assert_eq!(article.links.len(), 2);
        assert_eq!(article.links[0].page, "Ulm");
        assert_eq!(article.links[0].text, "Ulm");
        assert_eq!(article.links[1].page, "Physics");
        assert_eq!(article.links[1].text, "theoretical physics");
    }

    #[test]
    fn detects_disambiguation_templates() {
        let parser = WikitextParser::default();
        assert!(parser.parse(page("'''Mercury''' may refer to:\n{{disambiguation}}")).is_disambiguation);
        assert!(!parser.parse(page("{{Infobox person|name=X}}")).is_disambiguation);
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let parser = WikitextParser::default();
        let wikitext = "{{Infobox person|name=X}} Some [[text]].\n[[Category:Things]]";
        assert_eq!(parser.parse(page(wikitext)), parser.parse(page(wikitext)));
    }

    #[test]
    fn malformed_wikitext_parses_without_panic() {
        let parser = WikitextParser::default();
        for bad in ["{{", "[[[[", "{{Infobox", "{|{|{|", "#REDIRECT [[", "<!--"] {
            let _ = parser.parse(page(bad));
        }
    }
}
