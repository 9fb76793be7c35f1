use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The embedding backend failed or timed out
    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Empty, zero-norm or non-finite vector
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("top_k must be at least 1")]
    InvalidTopK,
}

pub type Result<T> = std::result::Result<T, IndexError>;
