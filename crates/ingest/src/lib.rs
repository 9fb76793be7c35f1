pub mod chunk;
pub mod chunker;
pub mod keywords;

pub use chunk::{Chunk, Position};
pub use chunker::{Chunker, ChunkerConfig, PAGE_BREAK, estimate_tokens};
pub use keywords::{content_terms, extract_keywords, term_runs};
