mod infobox;
mod parser;
mod text;

pub use infobox::extract_infoboxes;
pub use parser::{ParserOptions, WikitextParser, DEFAULT_DISAMBIGUATION_TEMPLATES};
pub use text::{plaintext_of, resolve_links};
