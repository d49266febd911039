mod bm25;
mod tokenizer;

pub use bm25::{Bm25Config, Bm25Index, Bm25Match};
pub use tokenizer::Bm25Tokenizer;
