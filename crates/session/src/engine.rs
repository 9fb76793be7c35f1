use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use extract::{EntityNormalizer, LlmBackend, OllamaClient, SamplingConfig, Triple, TripleExtractor};
use graph::KnowledgeGraph;
use index::{DocumentIndex, Embedder, HashingEmbedder, Indexer, OllamaEmbedder};
use ingest::{Chunk, Chunker};
use query::{HybridRetriever, KnowledgeBase, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheStats, CachedEmbedder, EmbeddingCache};
use crate::config::{AppConfig, EmbedderKind};
use crate::error::{EngineError, Result};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use crate::retry::{RetryPolicy, RetryingEmbedder, RetryingLlm};

const SNAPSHOT_VERSION: u32 = 1;

/// Everything one ingestion pass produced for a document. Kept so the
/// knowledge base can be rebuilt without calling the models again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentArtifacts {
    pub source_id: String,
    /// Chunks that were embedded, in document order
    pub chunks: Vec<Chunk>,
    /// One per entry in `chunks`
    pub embeddings: Vec<Vec<f32>>,
    pub triples: Vec<Triple>,
    /// Chunks dropped because their embedding failed or was rejected
    pub skipped_chunks: Vec<String>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub source_id: String,
    /// Chunks of this document now searchable
    pub chunk_count: usize,
    pub skipped_chunks: usize,
    pub sampled_chunks: usize,
    pub triple_count: usize,
    /// Graph totals after the document was merged in
    pub node_count: usize,
    pub edge_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: Vec<String>,
    pub chunk_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub ingests_in_flight: usize,
    pub metrics: MetricsSnapshot,
    pub cache: Option<CacheStats>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    created_at: DateTime<Utc>,
    documents: Vec<DocumentArtifacts>,
}

/// Owns the queryable knowledge base for a set of documents.
///
/// Each ingest is built off to the side from its own chunks, embeddings and
/// triples, then the whole knowledge base is rebuilt from the committed
/// documents and swapped in atomically. Searches always read a complete
/// knowledge base and never wait on an ingest.
pub struct RetrievalEngine {
    chunker: Chunker,
    sampling: SamplingConfig,
    max_concurrent_extractions: usize,
    aliases: Vec<(String, String)>,
    indexer: Indexer,
    extractor: TripleExtractor,
    retriever: HybridRetriever,
    cache: Option<Arc<EmbeddingCache>>,
    metrics: Metrics,
    documents: Mutex<BTreeMap<String, Arc<DocumentArtifacts>>>,
    published: ArcSwap<KnowledgeBase>,
    in_flight: DashMap<String, CancellationToken>,
}

impl RetrievalEngine {
    /// Engine over explicit backends; retry and cache wrappers are applied per `config`
    pub fn new(embedder: Arc<dyn Embedder>, llm: Arc<dyn LlmBackend>, config: &AppConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);

        let mut embedder: Arc<dyn Embedder> = Arc::new(RetryingEmbedder::new(embedder, policy.clone()));
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(EmbeddingCache::new(config.cache.max_entries)));
        if let Some(cache) = &cache {
            embedder = Arc::new(CachedEmbedder::new(embedder, cache.clone()));
        }
        let llm: Arc<dyn LlmBackend> = Arc::new(RetryingLlm::new(llm, policy));

        Self {
            chunker: Chunker::new(config.chunker.clone()),
            sampling: config.extraction.sampling(),
            max_concurrent_extractions: config.concurrency.max_concurrent_extractions,
            aliases: config
                .extraction
                .aliases
                .iter()
                .map(|(alias, canonical)| (alias.clone(), canonical.clone()))
                .collect(),
            indexer: Indexer::new(embedder.clone(), config.concurrency.max_concurrent_embeddings),
            extractor: TripleExtractor::new(llm).with_repair_attempts(config.extraction.repair_attempts),
            retriever: HybridRetriever::with_config(embedder, config.retrieval.clone()),
            cache,
            metrics: Metrics::new(),
            documents: Mutex::new(BTreeMap::new()),
            published: ArcSwap::from_pointee(KnowledgeBase::default()),
            in_flight: DashMap::new(),
        }
    }

    /// Engine talking to the configured Ollama server
    pub fn from_config(config: &AppConfig) -> Self {
        let backend = &config.backend;
        let embedder: Arc<dyn Embedder> = match backend.embedder {
            EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
                backend.ollama_url.clone(),
                backend.embedding_model.clone(),
                backend.request_timeout(),
            )),
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(backend.hashing_dimension)),
        };
        let llm = Arc::new(OllamaClient::new(
            backend.ollama_url.clone(),
            backend.llm_model.clone(),
            backend.request_timeout(),
        ));
        Self::new(embedder, llm, config)
    }

    /// Current knowledge base. Later commits do not affect the returned value.
    pub fn knowledge_base(&self) -> Arc<KnowledgeBase> {
        self.published.load_full()
    }

    pub async fn ingest(&self, document_text: &str, source_id: &str) -> Result<IngestionSummary> {
        self.ingest_with_cancel(document_text, source_id, CancellationToken::new())
            .await
    }

    /// Ingest a document, replacing any earlier version with the same `source_id`.
    ///
    /// Nothing becomes searchable until the whole document is processed.
    /// Cancelling `cancel` (or calling [`remove_document`](Self::remove_document))
    /// discards the partial work and leaves the knowledge base untouched.
    pub async fn ingest_with_cancel(
        &self,
        document_text: &str,
        source_id: &str,
        cancel: CancellationToken,
    ) -> Result<IngestionSummary> {
        match self.in_flight.entry(source_id.to_string()) {
            Entry::Occupied(_) => return Err(EngineError::IngestInProgress(source_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let _job = InFlightJob {
            jobs: &self.in_flight,
            source_id,
        };

        let timer = TimedOperation::start();
        let staged = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled(source_id.to_string())),
            staged = self.stage(document_text, source_id) => staged,
        };
        let result = match staged {
            Ok((artifacts, sampled)) => self.commit(artifacts, sampled, &cancel).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(summary) => {
                self.metrics.record_ingest(
                    timer.elapsed(),
                    summary.chunk_count,
                    summary.skipped_chunks,
                    summary.triple_count,
                );
                info!(
                    source = %source_id,
                    chunks = summary.chunk_count,
                    triples = summary.triple_count,
                    nodes = summary.node_count,
                    edges = summary.edge_count,
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    "Document ingested"
                );
            }
            Err(e) => {
                self.metrics.record_failed_ingest();
                warn!(source = %source_id, error = %e, "Ingestion failed");
            }
        }
        result
    }

    /// Chunk, embed and extract into a private staging value
    async fn stage(&self, document_text: &str, source_id: &str) -> Result<(DocumentArtifacts, usize)> {
        let chunks = self.chunker.chunk_text(source_id, document_text);
        let sampled = self.sampling.select(&chunks);

        let (embedded, extracted) = tokio::join!(
            self.indexer.embed_chunks(chunks.clone()),
            self.extractor
                .extract_batch(&sampled, self.max_concurrent_extractions)
        );

        if embedded.backend_unreachable() {
            if let Some((_, e)) = embedded.failures.first() {
                return Err(e.into());
            }
        }
        if extracted.backend_unreachable() {
            if let Some((_, e)) = extracted.failures.first() {
                return Err(e.into());
            }
        }

        // Run embeddings past the same checks publish will apply
        let mut staging = match self.knowledge_base().index().vectors().dimension() {
            Some(dimension) => DocumentIndex::with_dimension(dimension),
            None => DocumentIndex::new(),
        };
        let mut skipped_chunks: Vec<String> = embedded.failures.iter().map(|(id, _)| id.clone()).collect();
        let mut chunks = Vec::with_capacity(embedded.embedded.len());
        let mut embeddings = Vec::with_capacity(embedded.embedded.len());
        for (chunk, embedding) in embedded.embedded {
            match staging.insert(chunk.clone(), &embedding) {
                Ok(()) => {
                    chunks.push(chunk);
                    embeddings.push(embedding);
                }
                Err(e) => {
                    warn!(chunk = %chunk.chunk_id, source = %source_id, error = %e, "Skipping chunk with unusable embedding");
                    skipped_chunks.push(chunk.chunk_id);
                }
            }
        }

        let kept: HashSet<&str> = chunks.iter().map(|chunk| chunk.chunk_id.as_str()).collect();
        let triples: Vec<Triple> = extracted
            .triples()
            .filter(|t| kept.contains(t.source_chunk_id.as_str()))
            .cloned()
            .collect();

        Ok((
            DocumentArtifacts {
                source_id: source_id.to_string(),
                chunks,
                embeddings,
                triples,
                skipped_chunks,
                ingested_at: Utc::now(),
            },
            sampled.len(),
        ))
    }

    async fn commit(
        &self,
        artifacts: DocumentArtifacts,
        sampled_chunks: usize,
        cancel: &CancellationToken,
    ) -> Result<IngestionSummary> {
        let mut documents = self.documents.lock().await;
        // Checked under the lock so a concurrent removal wins cleanly
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(artifacts.source_id));
        }

        let mut summary = IngestionSummary {
            source_id: artifacts.source_id.clone(),
            chunk_count: artifacts.chunks.len(),
            skipped_chunks: artifacts.skipped_chunks.len(),
            sampled_chunks,
            triple_count: artifacts.triples.len(),
            node_count: 0,
            edge_count: 0,
        };

        documents.insert(artifacts.source_id.clone(), Arc::new(artifacts));
        let kb = self.publish(&documents);
        summary.node_count = kb.graph().node_count();
        summary.edge_count = kb.graph().edge_count();
        Ok(summary)
    }

    /// Rebuild the knowledge base from committed documents and swap it in
    fn publish(&self, documents: &BTreeMap<String, Arc<DocumentArtifacts>>) -> Arc<KnowledgeBase> {
        let mut index = DocumentIndex::new();
        for doc in documents.values() {
            for (chunk, embedding) in doc.chunks.iter().zip(&doc.embeddings) {
                if let Err(e) = index.insert(chunk.clone(), embedding) {
                    warn!(chunk = %chunk.chunk_id, source = %doc.source_id, error = %e, "Dropping chunk with unusable embedding");
                }
            }
        }

        let normalizer = EntityNormalizer::with_aliases(self.aliases.iter().map(|(a, c)| (a.as_str(), c.as_str())));
        let graph = KnowledgeGraph::from_triples(documents.values().flat_map(|d| d.triples.iter()), normalizer);

        let kb = Arc::new(KnowledgeBase::new(index, graph));
        self.published.store(kb.clone());
        kb
    }

    pub async fn search(&self, query_text: &str, top_k: usize) -> Result<RetrievalResult> {
        let timer = TimedOperation::start();
        let kb = self.knowledge_base();
        let result = self
            .retriever
            .search(&kb, query_text, top_k)
            .await
            .map_err(EngineError::from);

        self.metrics.record_search(timer.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!(error = %e, "Search failed");
        }
        result
    }

    /// Cancel any in-flight ingest of `source_id` and drop the document.
    /// Returns whether a committed document was removed.
    pub async fn remove_document(&self, source_id: &str) -> bool {
        if let Some(job) = self.in_flight.get(source_id) {
            info!(source = %source_id, "Cancelling in-flight ingestion");
            job.cancel();
        }

        let mut documents = self.documents.lock().await;
        let removed = documents.remove(source_id).is_some();
        if removed {
            self.publish(&documents);
            info!(source = %source_id, "Document removed");
        }
        removed
    }

    pub async fn documents(&self) -> Vec<String> {
        self.documents.lock().await.keys().cloned().collect()
    }

    /// Serialized committed documents. Restoring rebuilds the same knowledge base.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let documents = self.documents.lock().await;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            documents: documents.values().map(|d| d.as_ref().clone()).collect(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Replace all committed documents with those in `blob`
    pub async fn restore(&self, blob: &[u8]) -> Result<Vec<String>> {
        let snapshot: Snapshot = serde_json::from_slice(blob)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if let Some(doc) = snapshot
            .documents
            .iter()
            .find(|d| d.chunks.len() != d.embeddings.len())
        {
            return Err(EngineError::Snapshot(format!(
                "document {} has {} chunks but {} embeddings",
                doc.source_id,
                doc.chunks.len(),
                doc.embeddings.len()
            )));
        }

        let mut documents = self.documents.lock().await;
        *documents = snapshot
            .documents
            .into_iter()
            .map(|d| (d.source_id.clone(), Arc::new(d)))
            .collect();
        let kb = self.publish(&documents);

        info!(
            documents = documents.len(),
            chunks = kb.index().len(),
            nodes = kb.graph().node_count(),
            created_at = %snapshot.created_at,
            "Restored snapshot"
        );
        Ok(documents.keys().cloned().collect())
    }

    pub async fn stats(&self) -> EngineStats {
        let documents = self.documents().await;
        let kb = self.knowledge_base();
        EngineStats {
            documents,
            chunk_count: kb.index().len(),
            node_count: kb.graph().node_count(),
            edge_count: kb.graph().edge_count(),
            ingests_in_flight: self.in_flight.len(),
            metrics: self.metrics.snapshot(),
            cache: self.cache.as_ref().map(|c| c.stats()),
        }
    }
}

/// Clears the in-flight marker however the ingest ends
struct InFlightJob<'a> {
    jobs: &'a DashMap<String, CancellationToken>,
    source_id: &'a str,
}

impl Drop for InFlightJob<'_> {
    fn drop(&mut self) {
        self.jobs.remove(self.source_id);
    }
}
