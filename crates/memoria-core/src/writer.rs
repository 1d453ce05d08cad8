//! Vector writer: the single commit point that ends a chunk's attempt.

use chrono::{DateTime, Utc};
use memoria_types::embedder::Embedder;
use memoria_types::error::{PipelineError, RepositoryError};
use memoria_types::memory::Failure;

use crate::embedding::check_dimensions;
use crate::repository::memory::{ChunkOutcome, ClaimedChunk, MemoryRepository, WriteResult};

/// Persists the outcome of a claimed attempt.
///
/// Vector, status, failure and audit fields go to storage in one
/// conditional write; a vector is never visible on a chunk that is not
/// GENERATED, nor a GENERATED chunk without its vector.
pub struct VectorWriter<M: MemoryRepository> {
    repo: M,
}

impl<M: MemoryRepository> VectorWriter<M> {
    pub fn new(repo: M) -> Self {
        Self { repo }
    }

    /// Commit `outcome` for `claim`.
    ///
    /// A generated vector whose length does not match the embedder is
    /// recorded as a terminal failure instead. Returns
    /// [`WriteResult::Discarded`] when the claim is stale, e.g. the memory
    /// was deleted while the provider call was in flight.
    pub async fn commit(
        &self,
        claim: &ClaimedChunk,
        embedder: &Embedder,
        outcome: ChunkOutcome,
        now: DateTime<Utc>,
    ) -> Result<WriteResult, PipelineError> {
        let outcome = match outcome {
            ChunkOutcome::Generated { vector } => {
                match check_dimensions(embedder, std::slice::from_ref(&vector)) {
                    Ok(()) => ChunkOutcome::Generated { vector },
                    Err(e) => ChunkOutcome::Failed {
                        failure: Failure::new(e.code, e.message),
                        retry_at: None,
                    },
                }
            }
            failed => failed,
        };

        let result = self
            .repo
            .write_outcome(claim, &outcome, now)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => PipelineError::not_found("chunk", claim.chunk_id),
                other => PipelineError::Internal(other.to_string()),
            })?;

        match result {
            WriteResult::Committed(status) => tracing::debug!(
                chunk_id = %claim.chunk_id,
                memory_id = %claim.memory_id,
                attempt = claim.attempt,
                memory_status = %status,
                "chunk outcome committed"
            ),
            WriteResult::Discarded => tracing::info!(
                chunk_id = %claim.chunk_id,
                memory_id = %claim.memory_id,
                "claim no longer valid, result discarded"
            ),
        }
        Ok(result)
    }
}
