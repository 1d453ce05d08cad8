//! Embedding client.
//!
//! [`EmbeddingBackend`] is the wire-level port: one provider call for one
//! batch. [`EmbeddingClient`] wraps it with what every provider needs:
//! batch splitting, the per-embedder limiter, a per-call deadline and the
//! response checks that turn a provider mistake into a permanent error.

use std::time::Duration;

use memoria_types::embedder::Embedder;
use memoria_types::error::{EmbedError, ErrorCode};

use crate::limiter::EmbedderLimiter;

/// Wire-level embedding call for a single batch.
///
/// Implementations live in memoria-infra (HTTP clients for OPENAI, VLLM and
/// TEI). They classify failures into transient and permanent errors but do
/// not retry.
pub trait EmbeddingBackend: Send + Sync {
    /// Embed `texts` with `embedder`, returning one vector per text in
    /// input order.
    fn embed_batch(
        &self,
        embedder: &Embedder,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send;
}

/// Verify a provider response against the registered embedder.
///
/// A count mismatch is a malformed response (INTERNAL); a vector of the
/// wrong length is an INVALID_ARGUMENT. Both are permanent.
pub fn check_response(
    embedder: &Embedder,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::permanent(
            ErrorCode::Internal,
            format!(
                "embedder '{}' returned {} vectors for {expected} inputs",
                embedder.name,
                vectors.len()
            ),
        ));
    }
    check_dimensions(embedder, vectors)
}

/// Every vector must have exactly the embedder's dimensionality.
pub fn check_dimensions(embedder: &Embedder, vectors: &[Vec<f32>]) -> Result<(), EmbedError> {
    let expected = embedder.dimensionality as usize;
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbedError::permanent(
            ErrorCode::InvalidArgument,
            format!(
                "embedder '{}' returned a {}-dimensional vector, expected {expected}",
                embedder.name,
                bad.len()
            ),
        ));
    }
    Ok(())
}

pub struct EmbeddingClient<B: EmbeddingBackend> {
    backend: B,
    limiter: EmbedderLimiter,
    default_timeout: Duration,
}

impl<B: EmbeddingBackend> EmbeddingClient<B> {
    pub fn new(backend: B, limiter: EmbedderLimiter, default_timeout: Duration) -> Self {
        Self {
            backend,
            limiter,
            default_timeout,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn deadline(&self, embedder: &Embedder) -> Duration {
        embedder
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Embed any number of texts, splitting them into provider-sized batches.
    ///
    /// Each batch is a separate provider call holding one limiter slot for
    /// its duration. The first failing batch fails the whole call.
    pub async fn embed(
        &self,
        embedder: &Embedder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(embedder.batch_size()) {
            let deadline = self.deadline(embedder);
            let _permit = self.limiter.acquire(embedder).await?;
            let batch_vectors =
                tokio::time::timeout(deadline, self.backend.embed_batch(embedder, batch))
                    .await
                    .map_err(|_| {
                        EmbedError::timeout(format!(
                            "embedder '{}' did not answer within {} ms",
                            embedder.name,
                            deadline.as_millis()
                        ))
                    })??;
            check_response(embedder, batch.len(), &batch_vectors)?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, embedder: &Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(embedder, &[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbedError::permanent(ErrorCode::Internal, "empty embedding response")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use memoria_types::error::FailureKind;

    use crate::test_support;

    /// Returns `dims`-length vectors and records each batch size.
    struct FixedBackend {
        dims: usize,
        batches: Mutex<Vec<usize>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FixedBackend {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                batches: Mutex::new(Vec::new()),
                delay: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingBackend for FixedBackend {
        async fn embed_batch(
            &self,
            _embedder: &Embedder,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.batches.lock().unwrap().push(texts.len());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
    }

    #[tokio::test]
    async fn test_splits_into_batches() {
        let mut embedder = test_support::embedder("tei", 3);
        embedder.max_batch_size = Some(2);
        let client = EmbeddingClient::new(
            FixedBackend::new(3),
            EmbedderLimiter::new(4),
            Duration::from_secs(5),
        );
        let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        let vectors = client.embed(&embedder, &texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(*client.backend().batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_permanent() {
        let embedder = test_support::embedder("tei", 8);
        let client = EmbeddingClient::new(
            FixedBackend::new(4),
            EmbedderLimiter::new(4),
            Duration::from_secs(5),
        );
        let err = client.embed_one(&embedder, "hello").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_transient() {
        let mut embedder = test_support::embedder("tei", 4);
        embedder.request_timeout_ms = Some(100);
        let mut backend = FixedBackend::new(4);
        backend.delay = Some(Duration::from_secs(10));
        let client = EmbeddingClient::new(backend, EmbedderLimiter::new(4), Duration::from_secs(30));
        let err = client.embed_one(&embedder, "slow").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.code, ErrorCode::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_limiter_bounds_concurrent_calls() {
        let mut embedder = test_support::embedder("tei", 2);
        embedder.max_concurrency = Some(2);
        let mut backend = FixedBackend::new(2);
        backend.delay = Some(Duration::from_millis(20));
        let client = std::sync::Arc::new(EmbeddingClient::new(
            backend,
            EmbedderLimiter::new(8),
            Duration::from_secs(5),
        ));

        let mut handles = Vec::new();
        for i in 0..6 {
            let client = client.clone();
            let embedder = embedder.clone();
            handles.push(tokio::spawn(async move {
                client.embed_one(&embedder, &format!("t{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(client.backend().peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_count_mismatch_is_internal() {
        let embedder = test_support::embedder("tei", 2);
        let err = check_response(&embedder, 2, &[vec![0.0, 1.0]]).unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(!err.is_transient());
    }
}
