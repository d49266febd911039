use once_cell::sync::Lazy;
use regex::Regex;

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static REF_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ref[^>/]*>.*?</ref>").expect("static regex"));
static REF_SELF_CLOSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<ref[^>]*/>").expect("static regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"));
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^=+\s*(.*?)\s*=+\s*$").expect("static regex"));
static EXTERNAL_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[https?://\S*(?:\s+([^\]]+))?\]").expect("static regex"));
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[*#:;]+\s*").expect("static regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Strip `{{…}}` templates and `{|…|}` tables, tracking nesting so inner
/// templates never leak. Single unbalanced closers are passed through.
fn strip_templates_and_tables(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut template_depth = 0usize;
    let mut table_depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{{") {
            template_depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"}}") && template_depth > 0 {
            template_depth -= 1;
            i += 2;
        } else if bytes[i..].starts_with(b"{|") {
            table_depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"|}") && table_depth > 0 {
            table_depth -= 1;
            i += 2;
        } else {
            if template_depth == 0 && table_depth == 0 {
                // Byte-wise copy is safe: multi-byte chars never start with
                // '{' or '}', so we only split at ASCII boundaries.
                let ch_len = utf8_len(bytes[i]);
                out.push_str(&text[i..i + ch_len]);
                i += ch_len;
                continue;
            }
            i += 1;
        }
    }
    out
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

/// Resolve `[[page|text]]` to `text` and `[[page]]` to `page`; namespaced
/// links (Category:, File:, …) are dropped entirely.
pub fn resolve_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("]]") {
            Some(end) => {
                let inner = &after[..end];
                if !inner.contains(':') {
                    let display = inner.rsplit('|').next().unwrap_or(inner);
                    out.push_str(display);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated link: keep the text, drop the markers.
                out.push_str(after);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Convert wikitext to prose, preserving paragraph breaks.
pub fn plaintext_of(wikitext: &str) -> String {
    let text = COMMENT.replace_all(wikitext, "");
    let text = REF_PAIR.replace_all(&text, "");
    let text = REF_SELF_CLOSED.replace_all(&text, "");
    let text = strip_templates_and_tables(&text);
    let text = resolve_links(&text);
    let text = EXTERNAL_LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "$1");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = text.replace("'''", "").replace("''", "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    let cleaned: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    cleaned.join("\n\n")
}
