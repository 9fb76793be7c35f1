pub mod chunk_store;
pub mod embeddings;
pub mod error;
pub mod vector_index;

pub use chunk_store::ChunkStore;
pub use embeddings::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use error::{IndexError, Result};
pub use vector_index::{ScoredChunk, VectorIndex};

use futures::stream::{self, StreamExt};
use ingest::Chunk;
use std::sync::Arc;
use tracing::{info, warn};

/// Chunk text and embeddings kept in lockstep: a chunk is stored only once
/// its embedding has been accepted by the vector index.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    chunks: ChunkStore,
    vectors: VectorIndex,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty index that only accepts embeddings of `dimension`
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            chunks: ChunkStore::default(),
            vectors: VectorIndex::with_dimension(dimension),
        }
    }

    pub fn insert(&mut self, chunk: Chunk, embedding: &[f32]) -> Result<()> {
        self.vectors.add(&chunk.chunk_id, embedding)?;
        self.chunks.insert(chunk);
        Ok(())
    }

    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<(&Chunk, f32)>> {
        Ok(self
            .vectors
            .search(query_embedding, top_k)?
            .into_iter()
            .filter_map(|hit| self.chunks.get(&hit.chunk_id).map(|chunk| (chunk, hit.score)))
            .collect())
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Every stored chunk has exactly one embedding and vice versa
    pub fn is_in_sync(&self) -> bool {
        self.chunks.len() == self.vectors.len()
            && self.vectors.ids().iter().all(|id| self.chunks.contains(id))
    }
}

/// Outcome of embedding a document's chunks. Chunks whose embedding failed
/// are left out of `embedded` and listed in `failures`.
#[derive(Debug, Default)]
pub struct EmbeddingReport {
    pub embedded: Vec<(Chunk, Vec<f32>)>,
    pub failures: Vec<(String, IndexError)>,
}

impl EmbeddingReport {
    pub fn backend_unreachable(&self) -> bool {
        self.embedded.is_empty()
            && self
                .failures
                .iter()
                .any(|(_, e)| matches!(e, IndexError::EmbeddingUnavailable(_)))
    }
}

/// Embeds chunks with bounded fan-out
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    max_concurrent: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrent: usize) -> Self {
        Self {
            embedder,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed every chunk, keeping document order in the report
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> EmbeddingReport {
        let total = chunks.len();
        let embedder = &self.embedder;

        let results: Vec<(Chunk, Result<Vec<f32>>)> = stream::iter(chunks)
            .map(|chunk| async move {
                let embedding = embedder.embed(&chunk.text).await;
                (chunk, embedding)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut report = EmbeddingReport::default();
        for (chunk, result) in results {
            match result {
                Ok(embedding) => report.embedded.push((chunk, embedding)),
                Err(e) => {
                    warn!(chunk = %chunk.chunk_id, error = %e, "Embedding failed, skipping chunk");
                    report.failures.push((chunk.chunk_id, e));
                }
            }
        }

        info!(
            chunks = total,
            embedded = report.embedded.len(),
            failed = report.failures.len(),
            "Embedded chunks"
        );
        report
    }
}
