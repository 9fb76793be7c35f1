use serde::{Deserialize, Serialize};

const MAX_FIELD_CHARS: usize = 120;

/// One (head, relation, tail) fact and the chunk it was read from.
/// Duplicates across chunks are expected; the graph merges them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub head: String,
    pub relation: String,
    pub tail: String,
    pub source_chunk_id: String,
}

impl Triple {
    pub fn new(head: &str, relation: &str, tail: &str, source_chunk_id: &str) -> Self {
        Self {
            head: head.to_string(),
            relation: relation.to_string(),
            tail: tail.to_string(),
            source_chunk_id: source_chunk_id.to_string(),
        }
    }
}

/// A triple as the model wrote it, before validation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTriple {
    #[serde(alias = "subject", alias = "source")]
    pub head: String,
    #[serde(alias = "predicate", alias = "relation_type")]
    pub relation: String,
    #[serde(alias = "object", alias = "target")]
    pub tail: String,
}

impl RawTriple {
    /// Strict schema check: all three fields non-blank and of sane length
    pub fn into_triple(self, source_chunk_id: &str) -> Option<Triple> {
        let fields = [self.head.trim(), self.relation.trim(), self.tail.trim()];
        if fields
            .iter()
            .any(|f| f.is_empty() || f.chars().count() > MAX_FIELD_CHARS)
        {
            return None;
        }

        Some(Triple::new(fields[0], fields[1], fields[2], source_chunk_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedChunk {
    pub chunk_id: String,
    pub triples: Vec<Triple>,
}
