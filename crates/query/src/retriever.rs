use graph::{EntityNode, KnowledgeGraph};
use index::Embedder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{QueryError, Result};
use crate::knowledge_base::KnowledgeBase;
use crate::mention::extract_mentions;
use crate::result::{GraphSignal, RelatedConcept, RetrievalResult, VectorMatch};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub max_hops: usize,
    /// Query entities expanded in the graph
    pub max_seed_entities: usize,
    pub max_related_concepts: usize,
    /// Longest word n-gram tried as an entity mention
    pub max_mention_words: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            max_seed_entities: 3,
            max_related_concepts: 10,
            max_mention_words: 3,
        }
    }
}

/// Vector search plus graph expansion over a [`KnowledgeBase`].
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_config(embedder, RetrieverConfig::default())
    }

    pub fn with_config(embedder: Arc<dyn Embedder>, config: RetrieverConfig) -> Self {
        Self { embedder, config }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Top `top_k` chunks by similarity and, separately, the concepts within
    /// `max_hops` of any entity named in the query.
    ///
    /// An empty index or graph is not an error; the result is empty and
    /// `graph_signal` says why. Any query against a non-empty index is
    /// embedded, so only the embedder refusing it fails the call.
    pub async fn search(&self, kb: &KnowledgeBase, query: &str, top_k: usize) -> Result<RetrievalResult> {
        if top_k == 0 {
            return Err(QueryError::InvalidTopK);
        }

        let vector_matches = self.vector_search(kb, query, top_k).await?;

        let graph = kb.graph();
        let mut result = RetrievalResult::empty(query, GraphSignal::EmptyGraph);
        result.vector_matches = vector_matches;

        if graph.is_empty() {
            debug!("Knowledge graph is empty, returning vector matches only");
            return Ok(result);
        }

        let seeds = self.resolve_seeds(graph, query);
        if seeds.is_empty() {
            result.graph_signal = GraphSignal::NoEntityInQuery;
            return Ok(result);
        }

        result.related_concepts = self.expand(graph, &seeds);
        result.seed_entities = seeds.iter().map(|s| s.name.clone()).collect();
        result.graph_signal = if result.related_concepts.is_empty() {
            GraphSignal::NoNeighbors
        } else {
            GraphSignal::Found
        };

        info!(
            vector_matches = result.vector_matches.len(),
            seeds = result.seed_entities.len(),
            related = result.related_concepts.len(),
            "Hybrid search complete"
        );
        Ok(result)
    }

    async fn vector_search(&self, kb: &KnowledgeBase, query: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
        let index = kb.index();
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        Ok(index
            .search(&embedding, top_k)?
            .into_iter()
            .map(|(chunk, score)| VectorMatch::from_chunk(chunk, score))
            .collect())
    }

    /// Graph entities named in the query: n-gram mentions resolved through
    /// `find_entity`, longest first, then any entity name found verbatim.
    fn resolve_seeds<'g>(&self, graph: &'g KnowledgeGraph, query: &str) -> Vec<&'g EntityNode> {
        let mut seeds: Vec<&EntityNode> = Vec::new();
        let by_mention = extract_mentions(query, self.config.max_mention_words)
            .into_iter()
            .filter_map(|mention| graph.find_entity(&mention));

        for node in by_mention.chain(graph.entities_mentioned_in(query)) {
            if seeds.len() >= self.config.max_seed_entities {
                break;
            }
            if !seeds.iter().any(|s| s.name == node.name) {
                seeds.push(node);
            }
        }

        debug!(seeds = ?seeds.iter().map(|s| &s.name).collect::<Vec<_>>(), "Resolved query entities");
        seeds
    }

    /// Union of seed neighborhoods. A concept reachable from several seeds
    /// keeps its smallest hop distance; seeds themselves are excluded.
    fn expand(&self, graph: &KnowledgeGraph, seeds: &[&EntityNode]) -> Vec<RelatedConcept> {
        let mut best: HashMap<String, (usize, RelatedConcept)> = HashMap::new();

        for seed in seeds {
            for related in graph.neighborhood(&seed.name, self.config.max_hops) {
                if seeds.iter().any(|s| s.name == related.name) {
                    continue;
                }
                let replace = best
                    .get(&related.name)
                    .is_none_or(|(_, existing)| related.hop_distance < existing.hop_distance);
                if replace {
                    let concept = RelatedConcept {
                        entity: related.name.clone(),
                        label: related.label,
                        hop_distance: related.hop_distance,
                        via: seed.name.clone(),
                        path: related.path,
                        relations: related.relations,
                        source_chunk_ids: related.source_chunk_ids.into_iter().collect(),
                    };
                    best.insert(related.name, (related.mention_count, concept));
                }
            }
        }

        let mut ranked: Vec<(usize, RelatedConcept)> = best.into_values().collect();
        ranked.sort_by(|(a_mentions, a), (b_mentions, b)| {
            a.hop_distance
                .cmp(&b.hop_distance)
                .then(b_mentions.cmp(a_mentions))
                .then(a.entity.cmp(&b.entity))
        });
        ranked.truncate(self.config.max_related_concepts);
        ranked.into_iter().map(|(_, concept)| concept).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::Triple;
    use index::{DocumentIndex, HashingEmbedder, IndexError};
    use ingest::{Chunk, Position};

    struct OfflineEmbedder;

    #[async_trait]
    impl Embedder for OfflineEmbedder {
        async fn embed(&self, _text: &str) -> index::Result<Vec<f32>> {
            Err(IndexError::EmbeddingUnavailable("connection refused".into()))
        }
    }

    fn chunk(ordinal: usize, text: &str) -> Chunk {
        Chunk::new("lecture", ordinal, text.to_string(), Position { page: ordinal + 1, start: 0, end: text.len() })
    }

    fn knowledge_base(triples: &[(&str, &str, &str)]) -> (KnowledgeBase, Vec<Chunk>) {
        let embedder = HashingEmbedder::default();
        let chunks = vec![
            chunk(0, "Dropout is used to prevent overfitting. Overfitting is related to regularization."),
            chunk(1, "Backpropagation computes gradients layer by layer."),
        ];
        let mut index = DocumentIndex::new();
        for c in &chunks {
            let embedding = embedder.embed_sync(&c.text).unwrap();
            index.insert(c.clone(), &embedding).unwrap();
        }

        let triples: Vec<Triple> = triples
            .iter()
            .map(|(h, r, t)| Triple::new(h, r, t, &chunks[0].chunk_id))
            .collect();
        let mut graph = KnowledgeGraph::new();
        graph.add_triples(&triples);

        (KnowledgeBase::new(index, graph), chunks)
    }

    fn retriever() -> HybridRetriever {
        HybridRetriever::new(Arc::new(HashingEmbedder::default()))
    }

    #[tokio::test]
    async fn test_dropout_scenario() {
        let (kb, chunks) = knowledge_base(&[
            ("Dropout", "prevents", "Overfitting"),
            ("Overfitting", "related_to", "Regularization"),
        ]);

        let result = retriever().search(&kb, "What is dropout?", 1).await.unwrap();

        assert_eq!(result.vector_matches.len(), 1);
        assert_eq!(result.vector_matches[0].chunk_id, chunks[0].chunk_id);
        assert_eq!(result.seed_entities, vec!["dropout"]);
        assert_eq!(result.graph_signal, GraphSignal::Found);

        let regularization = result
            .related_concepts
            .iter()
            .find(|c| c.entity == "regularization")
            .expect("regularization should be related");
        assert_eq!(regularization.hop_distance, 2);
        assert_eq!(regularization.via, "dropout");
        assert_eq!(regularization.path, vec!["dropout", "overfitting", "regularization"]);
        assert_eq!(result.related_concepts[0].entity, "overfitting");
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_degrades() {
        let result = retriever()
            .search(&KnowledgeBase::default(), "anything", 5)
            .await
            .unwrap();
        assert!(result.vector_matches.is_empty());
        assert!(result.related_concepts.is_empty());
        assert_eq!(result.graph_signal, GraphSignal::EmptyGraph);
    }

    #[tokio::test]
    async fn test_empty_index_skips_embedder() {
        let retriever = HybridRetriever::new(Arc::new(OfflineEmbedder));
        let result = retriever.search(&KnowledgeBase::default(), "dropout", 3).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_embedder_is_an_error() {
        let (kb, _) = knowledge_base(&[("Dropout", "prevents", "Overfitting")]);
        let retriever = HybridRetriever::new(Arc::new(OfflineEmbedder));
        let err = retriever.search(&kb, "What is dropout?", 3).await.unwrap_err();
        assert!(err.is_backend_unavailable());
    }

    #[tokio::test]
    async fn test_result_count_is_min_of_k_and_indexed() {
        let (kb, _) = knowledge_base(&[]);
        let result = retriever().search(&kb, "gradients and overfitting", 10).await.unwrap();
        assert_eq!(result.vector_matches.len(), 2);
        assert!(result.vector_matches[0].score >= result.vector_matches[1].score);
        assert_eq!(retriever().search(&kb, "x", 0).await, Err(QueryError::InvalidTopK));
    }

    #[tokio::test]
    async fn test_symbol_only_query_still_returns_matches() {
        let (kb, _) = knowledge_base(&[("Dropout", "prevents", "Overfitting")]);
        let result = retriever().search(&kb, "?!", 5).await.unwrap();
        assert_eq!(result.vector_matches.len(), 2);
        assert_eq!(result.graph_signal, GraphSignal::NoEntityInQuery);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_an_error() {
        let (kb, _) = knowledge_base(&[("Dropout", "prevents", "Overfitting")]);
        let result = retriever().search(&kb, "Tell me about transformers", 2).await.unwrap();
        assert!(result.related_concepts.is_empty());
        assert_eq!(result.graph_signal, GraphSignal::NoEntityInQuery);
    }

    #[tokio::test]
    async fn test_seed_entities_are_not_related_concepts() {
        let (kb, _) = knowledge_base(&[
            ("Dropout", "prevents", "Overfitting"),
            ("Overfitting", "related_to", "Regularization"),
        ]);
        let result = retriever().search(&kb, "dropout and overfitting", 2).await.unwrap();

        let entities: Vec<&str> = result.related_concepts.iter().map(|c| c.entity.as_str()).collect();
        assert_eq!(entities, vec!["regularization"]);
        assert_eq!(result.related_concepts[0].hop_distance, 1);
        assert_eq!(result.related_concepts[0].via, "overfitting");
    }

    #[tokio::test]
    async fn test_hop_budget_limits_expansion() {
        let (kb, _) = knowledge_base(&[
            ("Dropout", "prevents", "Overfitting"),
            ("Overfitting", "related_to", "Regularization"),
        ]);
        let config = RetrieverConfig { max_hops: 1, ..RetrieverConfig::default() };
        let retriever = HybridRetriever::with_config(Arc::new(HashingEmbedder::default()), config);

        let result = retriever.search(&kb, "What is dropout?", 1).await.unwrap();
        let entities: Vec<&str> = result.related_concepts.iter().map(|c| c.entity.as_str()).collect();
        assert_eq!(entities, vec!["overfitting"]);
    }
}
