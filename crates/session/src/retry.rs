use async_trait::async_trait;
use extract::{ExtractError, LlmBackend};
use index::{Embedder, IndexError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms)
    }

    /// Retry a future with exponential backoff
    pub async fn retry<F, Fut, T, E>(&self, operation_name: &str, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_when(operation_name, |_| true, f).await
    }

    /// Like [`retry`](Self::retry), but gives up at once on errors `is_transient` rejects
    pub async fn retry_when<F, Fut, T, E, P>(&self, operation_name: &str, is_transient: P, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

/// Retries embedding calls that failed because the backend was unreachable
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    async fn embed(&self, text: &str) -> index::Result<Vec<f32>> {
        self.policy
            .retry_when(
                "embed",
                |e| matches!(e, IndexError::EmbeddingUnavailable(_)),
                || self.inner.embed(text),
            )
            .await
    }
}

/// Retries generation calls that failed because the backend was unreachable
pub struct RetryingLlm {
    inner: Arc<dyn LlmBackend>,
    policy: RetryPolicy,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn LlmBackend>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmBackend for RetryingLlm {
    async fn generate(&self, prompt: &str) -> extract::Result<String> {
        self.policy
            .retry_when(
                "generate",
                |e| matches!(e, ExtractError::BackendUnavailable(_)),
                || self.inner.generate(prompt),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with `error` for the first `failures` calls
    struct FlakyEmbedder {
        calls: AtomicUsize,
        failures: usize,
        error: IndexError,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> index::Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(self.error.clone())
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    fn flaky(failures: usize, error: IndexError) -> Arc<FlakyEmbedder> {
        Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failures,
            error,
        })
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let inner = flaky(2, IndexError::EmbeddingUnavailable("refused".into()));
        let embedder = RetryingEmbedder::new(inner.clone(), RetryPolicy::new(3, 1, 2));

        assert_eq!(embedder.embed("x").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = flaky(10, IndexError::EmbeddingUnavailable("refused".into()));
        let embedder = RetryingEmbedder::new(inner.clone(), RetryPolicy::new(2, 1, 2));

        assert!(embedder.embed("x").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let inner = flaky(10, IndexError::InvalidEmbedding("zero vector".into()));
        let embedder = RetryingEmbedder::new(inner.clone(), RetryPolicy::new(5, 1, 2));

        assert!(matches!(embedder.embed("x").await, Err(IndexError::InvalidEmbedding(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_counts_attempts() {
        let policy = RetryPolicy::new(1, 1, 1);
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = policy
            .retry("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
