use extract::ExtractError;
use index::IndexError;
use query::QueryError;
use std::fmt;
use thiserror::Error;

/// Which external model a backend failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Extraction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Embedding => write!(f, "embedding"),
            Stage::Extraction => write!(f, "extraction"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// The model backend could not be reached for a whole operation
    #[error("{stage} backend unavailable: {message}")]
    BackendUnavailable { stage: Stage, message: String },

    #[error("Document {0} is already being ingested")]
    IngestInProgress(String),

    #[error("Ingestion of {0} was cancelled")]
    Cancelled(String),

    #[error("top_k must be at least 1")]
    InvalidTopK,

    /// Query embedding rejected by the index (dimension or validity)
    #[error("Index error: {0}")]
    Index(IndexError),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True when the caller should fall back to answering without grounding
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, EngineError::BackendUnavailable { .. })
    }
}

impl From<QueryError> for EngineError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidTopK | QueryError::Index(IndexError::InvalidTopK) => EngineError::InvalidTopK,
            QueryError::Index(IndexError::EmbeddingUnavailable(message)) => EngineError::BackendUnavailable {
                stage: Stage::Embedding,
                message,
            },
            QueryError::Index(e) => EngineError::Index(e),
        }
    }
}

impl From<&IndexError> for EngineError {
    fn from(err: &IndexError) -> Self {
        EngineError::BackendUnavailable {
            stage: Stage::Embedding,
            message: err.to_string(),
        }
    }
}

impl From<&ExtractError> for EngineError {
    fn from(err: &ExtractError) -> Self {
        EngineError::BackendUnavailable {
            stage: Stage::Extraction,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Snapshot(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
