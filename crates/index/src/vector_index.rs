use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Exact (flat) cosine-similarity index.
///
/// Vectors are L2-normalised on insert so a search is one dot product per
/// entry. Ties in score resolve by insertion order.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<String, usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.positions.contains_key(chunk_id)
    }

    /// Chunk ids in insertion order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Add or replace the embedding for `chunk_id`. The first vector fixes
    /// the index dimension.
    pub fn add(&mut self, chunk_id: &str, embedding: &[f32]) -> Result<()> {
        let normalized = self.validate(embedding)?;
        self.dimension.get_or_insert(normalized.len());

        match self.positions.get(chunk_id) {
            Some(&pos) => self.vectors[pos] = normalized,
            None => {
                self.positions.insert(chunk_id.to_string(), self.ids.len());
                self.ids.push(chunk_id.to_string());
                self.vectors.push(normalized);
            }
        }
        Ok(())
    }

    /// Top `k` chunks by descending cosine similarity. Returns everything
    /// when fewer than `k` are indexed, and nothing when the index is empty.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(IndexError::InvalidTopK);
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.validate(query)?;
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, v)| (pos, dot(&query, v)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk_id: self.ids[pos].clone(),
                score,
            })
            .collect())
    }

    fn validate(&self, embedding: &[f32]) -> Result<Vec<f32>> {
        if embedding.is_empty() {
            return Err(IndexError::InvalidEmbedding("empty vector".to_string()));
        }
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::InvalidEmbedding("non-finite component".to_string()));
        }

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(IndexError::InvalidEmbedding("zero vector".to_string()));
        }
        Ok(embedding.iter().map(|x| x / norm).collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
