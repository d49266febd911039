use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

use crate::RawPage;

/// One `{{Infobox …}}` template extracted from wikitext.
///
/// `kind` is the template name with the leading `Infobox` stripped and
/// lowercased (`"scientist"`, `"settlement"`, …). Field keys are
/// lowercased; values keep their original formatting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Infobox {
    pub kind: String,
    pub fields: BTreeMap<String, String>,
}

/// An internal `[[page|text]]` link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WikiLink {
    pub page: String,
    pub text: String,
}

/// A page with its wikitext decomposed into structured parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedArticle {
    pub title: String,
    pub id: u64,
    pub namespace: i32,
    pub timestamp: String,
    pub redirect: Option<String>,
    pub plaintext: String,
    pub infoboxes: Vec<Infobox>,
    pub links: Vec<WikiLink>,
    pub categories: Vec<String>,
    pub is_redirect: bool,
    pub is_disambiguation: bool,
}

#[derive(Error, Debug)]
pub enum ArticleValidationError {
    #[error("redirect page {0} has no redirect target")]
    MissingRedirectTarget(String),
}

impl TomeError for ArticleValidationError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl ParsedArticle {
    pub fn from_raw(raw: RawPage) -> Self {
        ParsedArticle {
            title: raw.title,
            id: raw.id,
            namespace: raw.namespace,
            timestamp: raw.timestamp,
            is_redirect: raw.redirect.is_some(),
            redirect: raw.redirect,
            plaintext: String::new(),
            infoboxes: Vec::new(),
            links: Vec::new(),
            categories: Vec::new(),
            is_disambiguation: false,
        }
    }

    /// A redirect must carry a non-empty target.
    pub fn validate(&self) -> Result<(), ArticleValidationError> {
        if self.is_redirect && self.redirect.as_deref().unwrap_or("").is_empty() {
            return Err(ArticleValidationError::MissingRedirectTarget(
                self.title.clone(),
            ));
        }
        Ok(())
    }
}

/// The article taxonomy used to partition the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleType {
    Person,
    Place,
    Org,
    Work,
    Event,
    Other,
}

impl ArticleType {
    pub const ALL: [ArticleType; 6] = [
        ArticleType::Person,
        ArticleType::Place,
        ArticleType::Org,
        ArticleType::Work,
        ArticleType::Event,
        ArticleType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleType::Person => "person",
            ArticleType::Place => "place",
            ArticleType::Org => "org",
            ArticleType::Work => "work",
            ArticleType::Event => "event",
            ArticleType::Other => "other",
        }
    }
}

impl fmt::Display for ArticleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown article type: {0}")]
pub struct UnknownArticleType(String);

impl TomeError for UnknownArticleType {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl FromStr for ArticleType {
    type Err = UnknownArticleType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(ArticleType::Person),
            "place" => Ok(ArticleType::Place),
            "org" => Ok(ArticleType::Org),
            "work" => Ok(ArticleType::Work),
            "event" => Ok(ArticleType::Event),
            "other" => Ok(ArticleType::Other),
            _ => Err(UnknownArticleType(s.to_string())),
        }
    }
}

/// A parsed article with its assigned type. Classification is a pure
/// function of `(infoboxes, categories)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedArticle {
    pub article: ParsedArticle,
    pub article_type: ArticleType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_type_round_trips_through_str() {
        for t in ArticleType::ALL {
            assert_eq!(t.as_str().parse::<ArticleType>().unwrap(), t);
        }
    }

    #[test]
    fn redirect_without_target_fails_validation() {
        let mut article = ParsedArticle::from_raw(RawPage {
            title: "X".to_string(),
            id: 1,
            namespace: 0,
            wikitext: String::new(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            redirect: Some(String::new()),
        });
        assert!(article.validate().is_err());
        article.redirect = Some("Y".to_string());
        assert!(article.validate().is_ok());
    }
}
