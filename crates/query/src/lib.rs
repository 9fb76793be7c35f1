pub mod error;
pub mod knowledge_base;
pub mod mention;
pub mod result;
pub mod retriever;

pub use error::{QueryError, Result};
pub use knowledge_base::KnowledgeBase;
pub use mention::extract_mentions;
pub use result::{GraphSignal, RelatedConcept, RetrievalResult, SourceLocation, VectorMatch};
pub use retriever::{HybridRetriever, RetrieverConfig};
