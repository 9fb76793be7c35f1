use index::IndexError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl QueryError {
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, QueryError::Index(IndexError::EmbeddingUnavailable(_)))
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
