use std::collections::HashMap;
use std::sync::LazyLock;

use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::hash::fnv1a_64;

/// Characters the NFD pass cannot fold because they are standalone code
/// points, not base + combining mark sequences.
static DIACRITIC_MAP: LazyLock<HashMap<char, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ('ø', "o"),
        ('Ø', "o"),
        ('æ', "ae"),
        ('Æ', "ae"),
        ('œ', "oe"),
        ('Œ', "oe"),
        ('ß', "ss"),
        ('đ', "d"),
        ('Đ', "d"),
        ('ð', "d"),
        ('Ð', "d"),
        ('ł', "l"),
        ('Ł', "l"),
        ('þ', "th"),
        ('Þ', "th"),
        ('ı', "i"),
    ])
});

/// Token-level abbreviation expansions, applied before punctuation is
/// stripped so the trailing period can disambiguate.
static ABBREVIATIONS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("st.", "saint"),
        ("mt.", "mount"),
        ("ft.", "fort"),
        ("pt.", "point"),
        ("is.", "island"),
        ("univ.", "university"),
        ("dept.", "department"),
        ("no.", "number"),
    ])
});

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizerOptions {
    #[serde(default = "NormalizerOptions::default_true")]
    pub remove_diacritics: bool,
    #[serde(default)]
    pub expand_abbreviations: bool,
    #[serde(default)]
    pub stem: bool,
    #[serde(default = "NormalizerOptions::default_max_length")]
    pub max_length: usize,
}

impl NormalizerOptions {
    fn default_true() -> bool {
        true
    }

    fn default_max_length() -> usize {
        128
    }
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        NormalizerOptions {
            remove_diacritics: true,
            expand_abbreviations: false,
            stem: false,
            max_length: Self::default_max_length(),
        }
    }
}

/// Canonicalizes terms for the lookup table, the title index, and bloom
/// membership. Output is purely a function of input and options.
///
/// Steps, in order: NFC compose, lowercase, diacritic fold (curated map
/// first, then NFD combining-mark strip), abbreviation expansion,
/// non-alphanumeric to space, whitespace collapse, stemming, truncation.
pub struct TermNormalizer {
    options: NormalizerOptions,
    stemmer: Stemmer,
}

impl Default for TermNormalizer {
    fn default() -> Self {
        Self::new(NormalizerOptions::default())
    }
}

impl TermNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        TermNormalizer {
            options,
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    pub fn options(&self) -> &NormalizerOptions {
        &self.options
    }

    pub fn normalize(&self, input: &str) -> String {
        let mut text: String = input.nfc().collect::<String>().to_lowercase();

        if self.options.remove_diacritics {
            text = fold_diacritics(&text);
        }

        if self.options.expand_abbreviations {
            text = expand_abbreviations(&text);
        }

        let stripped: String = text
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        let mut collapsed = String::with_capacity(stripped.len());
        for token in stripped.split_whitespace() {
            if !collapsed.is_empty() {
                collapsed.push(' ');
            }
            if self.options.stem {
                collapsed.push_str(&self.stemmer.stem(token));
            } else {
                collapsed.push_str(token);
            }
        }

        if collapsed.chars().count() > self.options.max_length {
            collapsed = collapsed.chars().take(self.options.max_length).collect();
            collapsed.truncate(collapsed.trim_end().len());
        }
        collapsed
    }

    /// 64-bit hash of the normalized form.
    pub fn hash(&self, input: &str) -> u64 {
        fnv1a_64(self.normalize(input).as_bytes())
    }
}

fn fold_diacritics(text: &str) -> String {
    let mapped: String = text
        .chars()
        .flat_map(|c| match DIACRITIC_MAP.get(&c) {
            Some(replacement) => replacement.chars().collect::<Vec<_>>(),
            None => vec![c],
        })
        .collect();
    mapped.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn expand_abbreviations(text: &str) -> String {
    text.split_whitespace()
        .map(|token| *ABBREVIATIONS.get(token).unwrap_or(&token))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalizer() -> TermNormalizer {
        TermNormalizer::default()
    }

    #[test]
    fn lowercases_and_collapses() {
        assert_eq!(normalizer().normalize("  Albert   EINSTEIN "), "albert einstein");
    }

    #[test]
    fn strips_punctuation_to_spaces() {
        assert_eq!(normalizer().normalize("Tokyo, Japan!"), "tokyo japan");
    }

    // Pins which characters the curated map handles and which fall to the
    // NFD combining-mark strip.
    #[test]
    fn curated_map_covers_non_decomposable_letters() {
        let n = normalizer();
        assert_eq!(n.normalize("Øresund"), "oresund");
        assert_eq!(n.normalize("Læsø"), "laeso");
        assert_eq!(n.normalize("Straße"), "strasse");
        assert_eq!(n.normalize("Łódź"), "lodz");
        assert_eq!(n.normalize("Þórshöfn"), "thorshofn");
    }

    #[test]
    fn nfd_strip_covers_accent_classes() {
        let n = normalizer();
        assert_eq!(n.normalize("café"), "cafe");
        assert_eq!(n.normalize("Zürich"), "zurich");
        assert_eq!(n.normalize("São Paulo"), "sao paulo");
    }

    #[test]
    fn diacritics_survive_when_disabled() {
        let n = TermNormalizer::new(NormalizerOptions {
            remove_diacritics: false,
            ..NormalizerOptions::default()
        });
        assert_eq!(n.normalize("café"), "café");
    }

    #[test]
    fn abbreviations_expand_before_punctuation_strip() {
        let n = TermNormalizer::new(NormalizerOptions {
            expand_abbreviations: true,
            ..NormalizerOptions::default()
        });
        assert_eq!(n.normalize("St. Petersburg"), "saint petersburg");
        assert_eq!(n.normalize("Mt. Fuji"), "mount fuji");
        // Without the trailing period the token is left alone.
        assert_eq!(n.normalize("street st"), "street st");
    }

    #[test]
    fn stemming_reduces_plurals() {
        let n = TermNormalizer::new(NormalizerOptions {
            stem: true,
            ..NormalizerOptions::default()
        });
        assert_eq!(n.normalize("running cities"), n.normalize("run citi"));
    }

    #[test]
    fn truncates_to_max_length() {
        let n = TermNormalizer::new(NormalizerOptions {
            max_length: 5,
            ..NormalizerOptions::default()
        });
        let out = n.normalize("abcdefghij");
        assert_eq!(out, "abcde");
    }

    #[test]
    fn hash_agrees_on_semantically_equal_inputs() {
        let n = normalizer();
        assert_eq!(n.hash("Einstein"), n.hash("einstein  "));
        assert_eq!(n.hash("Café"), n.hash("cafe"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(input in "\\PC{0,64}") {
            let n = normalizer();
            let once = n.normalize(&input);
            prop_assert_eq!(n.normalize(&once), once);
        }

        #[test]
        fn output_is_space_separated_alphanumeric(input in "\\PC{0,64}") {
            let out = normalizer().normalize(&input);
            prop_assert!(out.chars().all(|c| c.is_alphanumeric() || c == ' '));
            prop_assert!(!out.starts_with(' ') && !out.ends_with(' '));
        }
    }
}
