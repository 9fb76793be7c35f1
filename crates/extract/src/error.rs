use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// The LLM call failed or timed out
    #[error("LLM backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The model answered, but not with a parsable list of triples
    #[error("Malformed extraction output: {0}")]
    MalformedExtraction(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
