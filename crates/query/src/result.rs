use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub source: String,
    pub page: usize,
    pub start: usize,
    pub end: usize,
}

impl SourceLocation {
    pub fn citation(&self) -> String {
        format!("{}, p.{}", self.source, self.page)
    }
}

/// A chunk that matched the query by embedding similarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub chunk_id: String,
    pub text: String,
    pub source_location: SourceLocation,
    pub score: f32,
}

impl VectorMatch {
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            text: chunk.text.clone(),
            source_location: SourceLocation {
                source: chunk.source.clone(),
                page: chunk.position.page,
                start: chunk.position.start,
                end: chunk.position.end,
            },
            score,
        }
    }
}

/// A concept reached through the graph from an entity named in the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedConcept {
    pub entity: String,
    pub label: String,
    pub hop_distance: usize,
    /// Query entity the concept was reached from
    pub via: String,
    /// Entities from `via` to this concept, inclusive
    pub path: Vec<String>,
    pub relations: Vec<String>,
    pub source_chunk_ids: Vec<String>,
}

impl RelatedConcept {
    /// e.g. `dropout -[prevents]-> overfitting -[related_to]-> regularization`
    pub fn explain_path(&self) -> String {
        let mut out = self.path.first().cloned().unwrap_or_default();
        for (relation, entity) in self.relations.iter().zip(self.path.iter().skip(1)) {
            let _ = write!(out, " -[{relation}]-> {entity}");
        }
        out
    }
}

/// Why `related_concepts` is what it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphSignal {
    Found,
    /// Nothing has been extracted into the graph yet
    EmptyGraph,
    NoEntityInQuery,
    /// Query entities exist but have no neighbors within the hop budget
    NoNeighbors,
}

/// Two labeled result sets, kept apart so the caller can phrase grounded
/// text and suggested concepts differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub vector_matches: Vec<VectorMatch>,
    pub related_concepts: Vec<RelatedConcept>,
    /// Graph entities resolved from the query text
    pub seed_entities: Vec<String>,
    pub graph_signal: GraphSignal,
}

impl RetrievalResult {
    pub fn empty(query: &str, graph_signal: GraphSignal) -> Self {
        Self {
            query: query.to_string(),
            vector_matches: Vec::new(),
            related_concepts: Vec::new(),
            seed_entities: Vec::new(),
            graph_signal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vector_matches.is_empty() && self.related_concepts.is_empty()
    }

    pub fn has_related_concepts(&self) -> bool {
        self.graph_signal == GraphSignal::Found
    }

    /// Render as prompt context for the tutoring model
    pub fn to_context(&self) -> String {
        let mut context = String::new();

        if self.vector_matches.is_empty() {
            context.push_str("NO MATCHING LECTURE MATERIAL.\n");
        } else {
            context.push_str("RELEVANT LECTURE EXCERPTS:\n");
            for (i, m) in self.vector_matches.iter().enumerate() {
                let _ = write!(
                    context,
                    "[{}] ({}) {}\n\n",
                    i + 1,
                    m.source_location.citation(),
                    m.text
                );
            }
        }

        if self.related_concepts.is_empty() {
            context.push_str("\nNO RELATED CONCEPTS FOUND.\n");
        } else {
            context.push_str("\nRELATED CONCEPTS:\n");
            for concept in &self.related_concepts {
                let _ = writeln!(
                    context,
                    "- {} ({}-hop): {}",
                    concept.label,
                    concept.hop_distance,
                    concept.explain_path()
                );
            }
        }

        context
    }
}
