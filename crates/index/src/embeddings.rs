use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{IndexError, Result};

/// Maps text to a fixed-length dense vector. Implementations must be
/// deterministic for a fixed model and must fail rather than return a
/// placeholder vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
            client,
        }
    }
}

impl Default for OllamaEmbedder {
    fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "all-minilm".to_string(),
            Duration::from_secs(30),
        )
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::EmbeddingUnavailable(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(IndexError::EmbeddingUnavailable(format!(
                "Embedding request failed: {}",
                response.status()
            )));
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| IndexError::EmbeddingUnavailable(format!("unreadable embedding response: {e}")))?;

        if embedding_response.embedding.is_empty() {
            return Err(IndexError::InvalidEmbedding(format!(
                "model {} returned an empty vector",
                self.model
            )));
        }

        Ok(embedding_response.embedding)
    }
}

/// Offline embedder: signed feature hashing of lowercased words, CJK
/// ideographs and CJK bigrams into `dimension` buckets, L2-normalised.
///
/// Lexical only, but deterministic and dependency-free, which makes it the
/// embedder for tests and for running without a model server.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

const STOPWORD_WEIGHT: f32 = 0.25;

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        // Symbol-only text still hashes to a direction of its own
        let mut features = features(text);
        if features.is_empty() && !text.trim().is_empty() {
            features.push(text.trim().to_string());
        }

        for feature in features {
            let digest = Sha256::digest(feature.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
            ]) as usize
                % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            let weight = if ingest::keywords::is_stopword(&feature) {
                STOPWORD_WEIGHT
            } else {
                1.0
            };
            vector[bucket] += sign * weight;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(IndexError::InvalidEmbedding("text has no embeddable tokens".to_string()));
        }
        vector.iter_mut().for_each(|x| *x /= norm);
        Ok(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }
}

fn features(text: &str) -> Vec<String> {
    let mut features = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for c in text.to_lowercase().chars() {
        if ingest::keywords::is_cjk(c) {
            if !word.is_empty() {
                features.push(std::mem::take(&mut word));
            }
            features.push(c.to_string());
            if let Some(prev) = prev_cjk {
                features.push(format!("{prev}{c}"));
            }
            prev_cjk = Some(c);
            continue;
        }

        prev_cjk = None;
        if c.is_alphanumeric() {
            word.push(c);
        } else if !word.is_empty() {
            features.push(std::mem::take(&mut word));
        }
    }

    if !word.is_empty() {
        features.push(word);
    }
    features
}
