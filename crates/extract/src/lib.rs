pub mod error;
pub mod llm;
pub mod normalizer;
pub mod parse;
pub mod prompt;
pub mod sampler;
pub mod schema;

pub use error::{ExtractError, Result};
pub use llm::{LlmBackend, OllamaClient};
pub use normalizer::{EntityNormalizer, NormalizedEntity, normalize_relation};
pub use sampler::{SamplingConfig, SamplingPolicy};
pub use schema::{ExtractedChunk, RawTriple, Triple};

use futures::stream::{self, StreamExt};
use ingest::Chunk;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of extracting from a batch of chunks. Per-chunk backend failures
/// are recorded here instead of failing the batch.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub attempted: usize,
    pub extracted: Vec<ExtractedChunk>,
    pub failures: Vec<(String, ExtractError)>,
}

impl ExtractionReport {
    /// True when chunks were attempted and every one hit a backend failure
    pub fn backend_unreachable(&self) -> bool {
        self.attempted > 0 && self.failures.len() == self.attempted
    }

    pub fn triples(&self) -> impl Iterator<Item = &Triple> {
        self.extracted.iter().flat_map(|e| e.triples.iter())
    }
}

pub struct TripleExtractor {
    llm: Arc<dyn LlmBackend>,
    repair_attempts: usize,
}

impl TripleExtractor {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self {
            llm,
            repair_attempts: 1,
        }
    }

    /// How many times to ask the model to fix unparsable JSON before giving up
    pub fn with_repair_attempts(mut self, repair_attempts: usize) -> Self {
        self.repair_attempts = repair_attempts;
        self
    }

    /// Extract triples from one chunk.
    ///
    /// Malformed model output yields zero triples; only backend failures are errors.
    pub async fn extract(&self, chunk: &Chunk) -> Result<Vec<Triple>> {
        let prompt = prompt::build_extraction_prompt(&chunk.text);
        let response = self.llm.generate(&prompt).await?;

        let raw = match self.parse_with_repair(response).await {
            Ok(raw) => raw,
            Err(ExtractError::MalformedExtraction(reason)) => {
                warn!(chunk = %chunk.chunk_id, reason = %reason, "Discarding malformed extraction");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let total = raw.len();
        let triples: Vec<Triple> = raw
            .into_iter()
            .filter_map(|t| t.into_triple(&chunk.chunk_id))
            .collect();

        if triples.len() < total {
            debug!(
                chunk = %chunk.chunk_id,
                rejected = total - triples.len(),
                "Rejected triples failing schema checks"
            );
        }

        Ok(triples)
    }

    async fn parse_with_repair(&self, mut response: String) -> Result<Vec<RawTriple>> {
        let mut attempt = 0;
        loop {
            match parse::parse_triples(&response) {
                Ok(raw) => return Ok(raw),
                Err(e) if attempt >= self.repair_attempts => return Err(e),
                Err(e) => {
                    attempt += 1;
                    debug!(attempt, error = %e, "Asking model to repair its JSON");
                    response = self.llm.generate(&prompt::build_retry_prompt(&response)).await?;
                }
            }
        }
    }

    /// Extract from many chunks with at most `concurrency` model calls in flight.
    /// Results come back in document order regardless of completion order.
    pub async fn extract_batch(&self, chunks: &[&Chunk], concurrency: usize) -> ExtractionReport {
        let mut results: Vec<(usize, String, Result<Vec<Triple>>)> = stream::iter(chunks.iter().copied())
            .map(|chunk| async move {
                (chunk.ordinal, chunk.chunk_id.clone(), self.extract(chunk).await)
            })
            .buffer_unordered(concurrency.max(1))
            .boxed()
            .collect()
            .await;
        results.sort_by_key(|(ordinal, _, _)| *ordinal);

        let mut report = ExtractionReport {
            attempted: chunks.len(),
            ..Default::default()
        };

        for (_, chunk_id, result) in results {
            match result {
                Ok(triples) => report.extracted.push(ExtractedChunk { chunk_id, triples }),
                Err(e) => {
                    warn!(chunk = %chunk_id, error = %e, "Extraction failed, skipping chunk");
                    report.failures.push((chunk_id, e));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest::Position;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order; `None` simulates an unreachable backend
    struct ScriptedLlm {
        responses: Mutex<VecDeque<Option<String>>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(|r| r.map(str::to_string)).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            match self.responses.lock().unwrap().pop_front().flatten() {
                Some(response) => Ok(response),
                None => Err(ExtractError::BackendUnavailable("connection refused".into())),
            }
        }
    }

    fn chunk(ordinal: usize, text: &str) -> Chunk {
        Chunk::new("doc", ordinal, text.to_string(), Position { page: 1, start: 0, end: text.len() })
    }

    #[tokio::test]
    async fn test_extracts_triples_with_chunk_id() {
        let llm = ScriptedLlm::new(vec![Some(
            r#"{"triples": [{"head": "Dropout", "relation": "prevents", "tail": "Overfitting"}]}"#,
        )]);
        let extractor = TripleExtractor::new(llm);
        let c = chunk(0, "Dropout is used to prevent overfitting.");

        let triples = extractor.extract(&c).await.unwrap();
        assert_eq!(triples, vec![Triple::new("Dropout", "prevents", "Overfitting", &c.chunk_id)]);
    }

    #[tokio::test]
    async fn test_malformed_output_yields_zero_triples() {
        let llm = ScriptedLlm::new(vec![Some("no json here"), Some("still not json")]);
        let extractor = TripleExtractor::new(llm);

        let triples = extractor.extract(&chunk(0, "text")).await.unwrap();
        assert!(triples.is_empty());
    }

    #[tokio::test]
    async fn test_repair_prompt_recovers() {
        let llm = ScriptedLlm::new(vec![
            Some("{\"triples\": [{\"head\": \"A\""),
            Some(r#"{"triples": [{"head": "A", "relation": "r", "tail": "B"}]}"#),
        ]);
        let extractor = TripleExtractor::new(llm);

        assert_eq!(extractor.extract(&chunk(0, "text")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_an_error() {
        let extractor = TripleExtractor::new(ScriptedLlm::new(vec![None]));
        assert!(matches!(
            extractor.extract(&chunk(0, "text")).await,
            Err(ExtractError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_records_failures_and_keeps_order() {
        let llm = ScriptedLlm::new(vec![
            Some(r#"[{"head": "A", "relation": "r", "tail": "B"}]"#),
            None,
            Some(r#"[{"head": "C", "relation": "r", "tail": "D"}]"#),
        ]);
        // Sequential so the scripted responses line up with chunk order
        let extractor = TripleExtractor::new(llm);
        let chunks = [chunk(0, "one"), chunk(1, "two"), chunk(2, "three")];
        let refs: Vec<&Chunk> = chunks.iter().collect();

        let report = extractor.extract_batch(&refs, 1).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, chunks[1].chunk_id);
        assert!(!report.backend_unreachable());

        let heads: Vec<&str> = report.triples().map(|t| t.head.as_str()).collect();
        assert_eq!(heads, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_batch_all_failed_is_unreachable() {
        let extractor = TripleExtractor::new(ScriptedLlm::new(vec![None, None]));
        let chunks = [chunk(0, "one"), chunk(1, "two")];
        let refs: Vec<&Chunk> = chunks.iter().collect();

        assert!(extractor.extract_batch(&refs, 2).await.backend_unreachable());
    }
}
