pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod session;

pub use cache::{CacheStats, CachedEmbedder, EmbeddingCache};
pub use config::{AppConfig, EmbedderKind, OperationMode};
pub use engine::{DocumentArtifacts, EngineStats, IngestionSummary, RetrievalEngine};
pub use error::{EngineError, Result, Stage};
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::{RetryPolicy, RetryingEmbedder, RetryingLlm};
pub use session::{CourseSession, SessionInfo, SessionReport};
