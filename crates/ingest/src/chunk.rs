use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::chunker::estimate_tokens;
use crate::keywords::extract_keywords;

const KEYWORDS_PER_CHUNK: usize = 8;

/// Where a chunk sits in its source document, for citing it back to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 1-based page or slide number
    pub page: usize,
    /// Byte offset of the first character in the document
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl Position {
    pub fn citation(&self) -> String {
        format!("p.{}", self.page)
    }
}

/// A retrieval unit. Immutable once created; everything else refers to it by `chunk_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source: String,
    /// Position of the chunk in document order
    pub ordinal: usize,
    pub text: String,
    pub position: Position,
    pub keywords: BTreeSet<String>,
}

impl Chunk {
    pub fn new(source: &str, ordinal: usize, text: String, position: Position) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = Self::generate_chunk_id(source, ordinal, &text, position);
        let keywords = extract_keywords(&text, KEYWORDS_PER_CHUNK);

        Self {
            chunk_id,
            source: source.to_string(),
            ordinal,
            text,
            position,
            keywords,
        }
    }

    fn generate_chunk_id(source: &str, ordinal: usize, text: &str, position: Position) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(ordinal.to_string().as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(position.start.to_string().as_bytes());
        hasher.update(position.end.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }

    /// Distinct keywords per estimated token, used to prioritise chunks for extraction
    pub fn keyword_density(&self) -> f64 {
        let tokens = self.estimated_tokens();
        if tokens == 0 {
            0.0
        } else {
            self.keywords.len() as f64 / tokens as f64
        }
    }
}
