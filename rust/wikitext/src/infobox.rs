use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use tome_types::Infobox;

use crate::text::resolve_links;

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ref[^>/]*>.*?</ref>|<ref[^>]*/>").expect("static regex"));
static INFOBOX_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{\s*infobox").expect("static regex"));

/// Extract every `{{Infobox …}}` template. Keys are lowercased; values are
/// trimmed with links resolved and nested templates flattened to their
/// positional arguments.
pub fn extract_infoboxes(wikitext: &str) -> Vec<Infobox> {
    let mut infoboxes = Vec::new();
    let mut search_from = 0;
    while let Some(found) = INFOBOX_OPEN.find_at(wikitext, search_from) {
        let start = found.start();
        match matching_close(wikitext, start) {
            Some(end) => {
                let body = &wikitext[start + 2..end];
                if let Some(infobox) = parse_infobox_body(body) {
                    infoboxes.push(infobox);
                }
                search_from = end + 2;
            }
            // Unterminated template: stop scanning, keep what we have.
            None => break,
        }
    }
    infoboxes
}

/// Byte offset of the `}}` closing the template opened at `open`, tracking
/// nesting.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

/// Split on `|` at template top level, honoring `{{ }}` and `[[ ]]`
/// nesting inside values.
fn split_top_level(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut brace_depth = 0isize;
    let mut bracket_depth = 0isize;
    let mut segment_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{{") {
            brace_depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"}}") {
            brace_depth -= 1;
            i += 2;
        } else if bytes[i..].starts_with(b"[[") {
            bracket_depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"]]") {
            bracket_depth -= 1;
            i += 2;
        } else if bytes[i] == b'|' && brace_depth == 0 && bracket_depth == 0 {
            parts.push(&body[segment_start..i]);
            i += 1;
            segment_start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&body[segment_start..]);
    parts
}

fn parse_infobox_body(body: &str) -> Option<Infobox> {
    let segments = split_top_level(body);
    let (name, fields) = segments.split_first()?;
    let kind = name
        .trim()
        .to_lowercase()
        .strip_prefix("infobox")
        .map(|rest| rest.trim().to_string())?;

    let mut map = BTreeMap::new();
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        let value = clean_value(value);
        if !value.is_empty() {
            map.insert(key, value);
        }
    }
    Some(Infobox { kind, fields: map })
}

fn clean_value(raw: &str) -> String {
    let value = COMMENT.replace_all(raw, "");
    let value = REF.replace_all(&value, "");
    let value = flatten_templates(&value);
    resolve_links(&value).trim().to_string()
}

/// Replace `{{name|a|b|k=v}}` with `a b`: positional arguments survive,
/// named options are dropped. Applied recursively to the arguments.
fn flatten_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        match matching_close(rest, start) {
            Some(end) => {
                let inner = &rest[start + 2..end];
                let segments = split_top_level(inner);
                let args: Vec<String> = segments
                    .iter()
                    .skip(1)
                    .filter(|s| !s.contains('='))
                    .map(|s| flatten_templates(s.trim()))
                    .filter(|s| !s.is_empty())
                    .collect();
                out.push_str(&args.join(" "));
                rest = &rest[end + 2..];
            }
            None => {
                out.push_str(&rest[start + 2..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EINSTEIN: &str = "{{Infobox scientist\n\
        | name = Albert Einstein\n\
        | birth_date = {{birth date|1879|3|14}}\n\
        | birth_place = [[Ulm]], [[Kingdom of Württemberg|Württemberg]]\n\
        | field = [[Physics]]\n\
        }}\nBody text.";

    #[test]
    fn extracts_kind_and_fields() {
        let boxes = extract_infoboxes(EINSTEIN);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].kind, "scientist");
        assert_eq!(boxes[0].fields["name"], "Albert Einstein");
        assert_eq!(boxes[0].fields["birth_place"], "Ulm, Württemberg");
    }

    #[test]
    fn nested_templates_flatten_to_positional_args() {
        let boxes = extract_infoboxes(EINSTEIN);
        assert_eq!(boxes[0].fields["birth_date"], "1879 3 14");
    }

    #[test]
    fn keys_are_case_insensitive() {
        let boxes = extract_infoboxes("{{Infobox person|Name=Ada|BORN = 1815}}");
        assert_eq!(boxes[0].fields["name"], "Ada");
        assert_eq!(boxes[0].fields["born"], "1815");
    }

    #[test]
    fn multiple_infoboxes_are_all_extracted() {
        let text = "{{Infobox person|name=A}} mid {{Infobox settlement|name=B}}";
        let boxes = extract_infoboxes(text);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].kind, "person");
        assert_eq!(boxes[1].kind, "settlement");
    }

    #[test]
    fn unterminated_infobox_is_skipped() {
        assert!(extract_infoboxes("{{Infobox person|name=A").is_empty());
    }

    #[test]
    fn pipes_inside_links_do_not_split_fields() {
        let boxes =
            extract_infoboxes("{{Infobox person|spouse=[[Mileva Marić|Mileva]]|children=3}}");
        assert_eq!(boxes[0].fields["spouse"], "Mileva");
        assert_eq!(boxes[0].fields["children"], "3");
    }
}
