use async_trait::async_trait;
use extract::{ExtractError, LlmBackend};
use index::{Embedder, HashingEmbedder};
use query::GraphSignal;
use session::{AppConfig, CourseSession, EngineError, RetrievalEngine, Stage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PAGE_BREAK: char = '\x0c';

/// Answers with the canned JSON whose key appears in the chunk text
struct KeyedLlm {
    responses: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl LlmBackend for KeyedLlm {
    async fn generate(&self, prompt: &str) -> extract::Result<String> {
        let text = prompt.split("TEXT:\n").nth(1).unwrap_or("");
        Ok(self
            .responses
            .iter()
            .find(|(key, _)| text.contains(key))
            .map(|(_, response)| response.to_string())
            .unwrap_or_else(|| "[]".to_string()))
    }
}

struct OfflineLlm;

#[async_trait]
impl LlmBackend for OfflineLlm {
    async fn generate(&self, _prompt: &str) -> extract::Result<String> {
        Err(ExtractError::BackendUnavailable("connection refused".into()))
    }
}

struct SlowLlm;

#[async_trait]
impl LlmBackend for SlowLlm {
    async fn generate(&self, _prompt: &str) -> extract::Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("[]".to_string())
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.extraction.sample_fraction = 1.0;
    config.retry.max_retries = 0;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 1;
    config
}

fn engine_with(llm: Arc<dyn LlmBackend>) -> RetrievalEngine {
    RetrievalEngine::new(Arc::new(HashingEmbedder::default()), llm, &test_config())
}

/// Returns a non-finite vector for chunks mentioning `poison`
struct CorruptingEmbedder {
    inner: HashingEmbedder,
    poison: &'static str,
}

#[async_trait]
impl Embedder for CorruptingEmbedder {
    async fn embed(&self, text: &str) -> index::Result<Vec<f32>> {
        if text.contains(self.poison) {
            Ok(vec![f32::NAN; self.inner.dimension()])
        } else {
            self.inner.embed(text).await
        }
    }
}

fn lecture_engine() -> RetrievalEngine {
    engine_with(lecture_llm())
}

fn lecture_llm() -> Arc<dyn LlmBackend> {
    Arc::new(KeyedLlm {
        responses: vec![
            (
                "Dropout is used",
                r#"{"triples": [
                    {"head": "Dropout", "relation": "prevents", "tail": "Overfitting"},
                    {"head": "Overfitting", "relation": "related_to", "tail": "Regularization"}
                ]}"#,
            ),
            (
                "Backpropagation",
                r#"[{"head": "Backpropagation", "relation": "computes", "tail": "Gradients"}]"#,
            ),
        ],
    })
}

fn lecture() -> String {
    format!(
        "Dropout is used to prevent overfitting. Overfitting is related to regularization.{PAGE_BREAK}\
         Backpropagation computes gradients layer by layer.{PAGE_BREAK}\
         Learning rate schedules adjust the step size during training."
    )
}

#[tokio::test]
async fn dropout_question_surfaces_unmentioned_prerequisite() {
    let engine = lecture_engine();
    let summary = engine.ingest(&lecture(), "lecture-3").await.unwrap();
    assert_eq!(summary.chunk_count, 3);
    assert_eq!(summary.triple_count, 3);

    let kb = engine.knowledge_base();
    let first_chunk = kb.index().chunks().iter().next().unwrap().chunk_id.clone();

    let result = engine.search("What is dropout?", 1).await.unwrap();
    assert_eq!(result.vector_matches.len(), 1);
    assert_eq!(result.vector_matches[0].chunk_id, first_chunk);
    assert_eq!(result.vector_matches[0].source_location.page, 1);

    let regularization = result
        .related_concepts
        .iter()
        .find(|c| c.entity == "regularization")
        .expect("regularization should be a related concept");
    assert_eq!(regularization.hop_distance, 2);
    assert_eq!(regularization.source_chunk_ids, vec![first_chunk]);
    assert_eq!(result.graph_signal, GraphSignal::Found);
}

#[tokio::test]
async fn rejected_embeddings_are_left_out_of_the_summary_and_graph() {
    let embedder = CorruptingEmbedder {
        inner: HashingEmbedder::default(),
        poison: "Backpropagation",
    };
    let engine = RetrievalEngine::new(Arc::new(embedder), lecture_llm(), &test_config());
    let summary = engine.ingest(&lecture(), "lecture-3").await.unwrap();

    assert_eq!(summary.chunk_count, 2);
    assert_eq!(summary.skipped_chunks, 1);
    assert_eq!(summary.triple_count, 2);
    assert_eq!(summary.node_count, 3);

    let kb = engine.knowledge_base();
    assert_eq!(kb.index().len(), 2);
    assert!(kb.index().is_in_sync());
    assert!(kb.graph().entity("backpropagation").is_none());
    assert!(kb.graph().entity("gradients").is_none());
}

#[tokio::test]
async fn empty_engine_degrades_gracefully() {
    let engine = engine_with(Arc::new(OfflineLlm));
    let result = engine.search("anything", 5).await.unwrap();
    assert!(result.vector_matches.is_empty());
    assert!(result.related_concepts.is_empty());
    assert_eq!(result.graph_signal, GraphSignal::EmptyGraph);
    assert!(result.to_context().contains("NO RELATED CONCEPTS FOUND"));
}

#[tokio::test]
async fn search_returns_min_of_k_and_indexed() {
    let engine = lecture_engine();
    engine.ingest(&lecture(), "lecture-3").await.unwrap();

    assert_eq!(engine.search("training gradients", 2).await.unwrap().vector_matches.len(), 2);

    let all = engine.search("training gradients", 10).await.unwrap().vector_matches;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));

    assert!(matches!(engine.search("x", 0).await, Err(EngineError::InvalidTopK)));
}

#[tokio::test]
async fn index_and_chunk_store_stay_in_sync() {
    let engine = lecture_engine();
    engine.ingest(&lecture(), "lecture-3").await.unwrap();
    engine.ingest("Batch normalization stabilizes training.", "lecture-4").await.unwrap();

    let kb = engine.knowledge_base();
    assert!(kb.index().is_in_sync());
    assert_eq!(kb.index().len(), 4);
    assert_eq!(kb.index().vectors().len(), 4);
}

#[tokio::test]
async fn rechunking_is_deterministic() {
    let first = lecture_engine();
    let second = lecture_engine();
    first.ingest(&lecture(), "lecture-3").await.unwrap();
    second.ingest(&lecture(), "lecture-3").await.unwrap();

    let ids = |engine: &RetrievalEngine| -> Vec<String> {
        engine
            .knowledge_base()
            .index()
            .chunks()
            .iter()
            .map(|c| c.chunk_id.clone())
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn snapshot_round_trip_preserves_neighbors() {
    let engine = lecture_engine();
    engine.ingest(&lecture(), "lecture-3").await.unwrap();
    let blob = engine.snapshot().await.unwrap();

    let restored = engine_with(Arc::new(OfflineLlm));
    assert_eq!(restored.restore(&blob).await.unwrap(), vec!["lecture-3"]);

    let before = engine.knowledge_base();
    let after = restored.knowledge_base();
    for entity in ["dropout", "overfitting", "regularization", "backpropagation"] {
        for hops in 1..=3 {
            assert_eq!(
                before.graph().neighbors(entity, hops),
                after.graph().neighbors(entity, hops),
                "neighbors({entity}, {hops})"
            );
        }
    }

    let original = engine.search("What is dropout?", 2).await.unwrap();
    let reloaded = restored.search("What is dropout?", 2).await.unwrap();
    assert_eq!(original.vector_matches, reloaded.vector_matches);
    assert_eq!(original.related_concepts, reloaded.related_concepts);
}

#[tokio::test]
async fn restore_rejects_garbage() {
    let engine = engine_with(Arc::new(OfflineLlm));
    assert!(matches!(engine.restore(b"not a snapshot").await, Err(EngineError::Snapshot(_))));
}

#[tokio::test]
async fn duplicate_triples_merge_into_one_edge() {
    let engine = engine_with(Arc::new(KeyedLlm {
        responses: vec![("relates", r#"[{"head": "A", "relation": "relates_to", "tail": "B"}]"#)],
    }));
    let text = format!("Alpha relates to beta.{PAGE_BREAK}Again alpha relates to beta here.");
    engine.ingest(&text, "doc").await.unwrap();

    let kb = engine.knowledge_base();
    assert_eq!(kb.graph().edge_count(), 1);
    let (_, edge, _) = kb.graph().edges().next().unwrap();
    assert_eq!(edge.weight, 2);
    assert_eq!(edge.source_chunk_ids.len(), 2);
}

#[tokio::test]
async fn malformed_extraction_does_not_block_ingestion() {
    let engine = engine_with(Arc::new(KeyedLlm {
        responses: vec![("Dropout", "Sure! Here are some triples: dropout -> overfitting")],
    }));
    let summary = engine.ingest("Dropout is used to prevent overfitting.", "doc").await.unwrap();

    assert_eq!(summary.chunk_count, 1);
    assert_eq!(summary.triple_count, 0);
    let result = engine.search("dropout", 3).await.unwrap();
    assert_eq!(result.vector_matches.len(), 1);
    assert_eq!(result.graph_signal, GraphSignal::EmptyGraph);
}

#[tokio::test]
async fn unreachable_llm_is_reported_and_nothing_is_published() {
    let engine = engine_with(Arc::new(OfflineLlm));
    let err = engine.ingest(&lecture(), "lecture-3").await.unwrap_err();

    assert!(err.is_backend_unavailable());
    assert!(matches!(err, EngineError::BackendUnavailable { stage: Stage::Extraction, .. }));
    assert!(engine.knowledge_base().is_empty());
    assert!(engine.documents().await.is_empty());
}

#[tokio::test]
async fn cancelled_ingest_leaves_index_untouched() {
    let engine = Arc::new(engine_with(Arc::new(SlowLlm)));
    let token = CancellationToken::new();

    let job = {
        let engine = engine.clone();
        let token = token.clone();
        tokio::spawn(async move { engine.ingest_with_cancel(&lecture(), "lecture-3", token).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = job.await.unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled(id)) if id == "lecture-3"));
    assert!(engine.knowledge_base().is_empty());
    assert_eq!(engine.stats().await.ingests_in_flight, 0);
}

#[tokio::test]
async fn removing_a_document_cancels_its_ingest() {
    let engine = Arc::new(engine_with(Arc::new(SlowLlm)));

    let job = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.ingest(&lecture(), "lecture-3").await })
    };

    while engine.stats().await.ingests_in_flight == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        engine.ingest("other text", "lecture-3").await,
        Err(EngineError::IngestInProgress(_))
    ));

    assert!(!engine.remove_document("lecture-3").await);
    assert!(matches!(job.await.unwrap(), Err(EngineError::Cancelled(_))));
    assert!(engine.knowledge_base().is_empty());
}

#[tokio::test]
async fn removing_a_document_rebuilds_without_it() {
    let engine = lecture_engine();
    engine.ingest(&lecture(), "lecture-3").await.unwrap();
    engine.ingest("Backpropagation needs the chain rule.", "lecture-4").await.unwrap();

    assert!(engine.remove_document("lecture-3").await);

    let kb = engine.knowledge_base();
    assert_eq!(kb.index().len(), 1);
    assert!(kb.graph().entity("dropout").is_none());
    assert!(kb.graph().entity("backpropagation").is_some());
    assert_eq!(engine.documents().await, vec!["lecture-4"]);
}

#[tokio::test]
async fn reingesting_a_document_replaces_it() {
    let engine = lecture_engine();
    engine.ingest(&lecture(), "lecture-3").await.unwrap();
    let summary = engine.ingest("Dropout is used to prevent overfitting.", "lecture-3").await.unwrap();

    assert_eq!(summary.chunk_count, 1);
    assert_eq!(engine.knowledge_base().index().len(), 1);
}

#[tokio::test]
async fn course_session_persists_between_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.data_dir = dir.path().to_path_buf();
    let cache_path = config.course_cache_path("ml-101");

    let session = CourseSession::start(Arc::new(lecture_engine()), "ml-101", cache_path.clone())
        .await
        .unwrap();
    assert!(session.info().await.documents.is_empty());

    session.ingest(&lecture(), "lecture-3").await.unwrap();
    session.query("What is dropout?", 3).await.unwrap();
    let report = session.end().await.unwrap();

    assert_eq!(report.queries, 1);
    assert_eq!(report.saved_to, cache_path);
    assert!(cache_path.exists());

    let resumed = CourseSession::start(Arc::new(engine_with(Arc::new(OfflineLlm))), "ml-101", cache_path)
        .await
        .unwrap();
    let info = resumed.info().await;
    assert_eq!(info.documents, vec!["lecture-3"]);
    assert_ne!(info.session_id, report.session_id);

    let result = resumed.query("What is dropout?", 1).await.unwrap();
    assert!(result.has_related_concepts());
}
