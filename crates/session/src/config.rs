use extract::{SamplingConfig, SamplingPolicy};
use ingest::ChunkerConfig;
use query::RetrieverConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub data_dir: PathBuf,
    pub backend: BackendConfig,
    pub chunker: ChunkerConfig,
    pub extraction: ExtractionConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrieverConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Sparse extraction, short timeouts, aggressive caching
    Accurate,  // Extract from every chunk, patient retries, no cache
    Balanced,  // Default
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Ollama,
    /// Offline lexical embedder, no model server needed
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub ollama_url: String,
    pub embedding_model: String,
    pub llm_model: String,
    pub embedder: EmbedderKind,
    pub hashing_dimension: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Share of chunks sent to the LLM for triple extraction
    pub sample_fraction: f64,
    pub policy: SamplingPolicy,
    pub repair_attempts: usize,
    /// alias -> canonical entity name
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_embeddings: usize,
    pub max_concurrent_extractions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            data_dir: PathBuf::from("data"),
            backend: BackendConfig::default(),
            chunker: ChunkerConfig::default(),
            extraction: ExtractionConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            retrieval: RetrieverConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            llm_model: "llama3".to_string(),
            embedder: EmbedderKind::Ollama,
            hashing_dimension: 384,
            request_timeout_secs: 60,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let sampling = SamplingConfig::default();
        Self {
            sample_fraction: sampling.fraction,
            policy: sampling.policy,
            repair_attempts: 1,
            aliases: BTreeMap::new(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeddings: 8,
            max_concurrent_extractions: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl ExtractionConfig {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            fraction: self.sample_fraction.clamp(0.0, 1.0),
            policy: self.policy,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        let mut config = Self {
            mode: OperationMode::Fast,
            ..Self::default()
        };
        config.backend.request_timeout_secs = 30;
        config.extraction.sample_fraction = 0.15;
        config.extraction.policy = SamplingPolicy::KeywordDensity;
        config.extraction.repair_attempts = 0;
        config.concurrency = ConcurrencyConfig {
            max_concurrent_embeddings: 16,
            max_concurrent_extractions: 8,
        };
        config.retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
        };
        config.cache.max_entries = 50000;
        config.retrieval.max_related_concepts = 5;
        config
    }

    pub fn accurate_mode() -> Self {
        let mut config = Self {
            mode: OperationMode::Accurate,
            ..Self::default()
        };
        config.backend.request_timeout_secs = 120;
        config.extraction.sample_fraction = 1.0;
        config.extraction.policy = SamplingPolicy::All;
        config.extraction.repair_attempts = 2;
        config.concurrency = ConcurrencyConfig {
            max_concurrent_embeddings: 4,
            max_concurrent_extractions: 2,
        };
        config.retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 2000,
            max_backoff_ms: 20000,
        };
        config.cache = CacheConfig {
            enabled: false,
            max_entries: 0,
        };
        config.retrieval.max_related_concepts = 20;
        config
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Load from a TOML file, falling back to defaults when the file is
    /// missing, then apply `GRAPHRAG_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Override backend settings from `lookup` (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GRAPHRAG_OLLAMA_URL") {
            self.backend.ollama_url = url;
        }
        if let Some(model) = lookup("GRAPHRAG_EMBED_MODEL") {
            self.backend.embedding_model = model;
        }
        if let Some(model) = lookup("GRAPHRAG_LLM_MODEL") {
            self.backend.llm_model = model;
        }
        if let Some(raw) = lookup("GRAPHRAG_SAMPLE_FRACTION") {
            match raw.parse::<f64>() {
                Ok(fraction) if (0.0..=1.0).contains(&fraction) => {
                    self.extraction.sample_fraction = fraction;
                }
                _ => warn!(value = %raw, "Ignoring invalid GRAPHRAG_SAMPLE_FRACTION"),
            }
        }
    }

    /// Where a course's snapshot is kept between sessions
    pub fn course_cache_path(&self, course_id: &str) -> PathBuf {
        let safe: String = course_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.data_dir
            .join("courses")
            .join(format!("{safe}_rag_cache.json"))
    }
}
