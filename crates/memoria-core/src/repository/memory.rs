//! Memory and chunk repository trait definition.
//!
//! Every method that moves a chunk between states also updates the owning
//! memory's tallies and derived status in the same transaction, so the
//! aggregate is never observable out of step with its chunks.

use chrono::{DateTime, Utc};
use memoria_types::error::RepositoryError;
use memoria_types::memory::{Failure, Memory, MemoryChunk, NewChunk, ProcessingStatus};
use uuid::Uuid;

/// A chunk reserved for exactly one in-flight embedding attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedChunk {
    pub chunk_id: Uuid,
    pub memory_id: Uuid,
    pub space_id: Uuid,
    /// The space's embedding model (an embedder name).
    pub embedding_model: String,
    pub sequence_number: u32,
    pub chunk_text: String,
    /// Attempt number of this claim (1 for the first attempt).
    pub attempt: u32,
    /// Token the final write must present; a write whose token no longer
    /// matches the row is discarded.
    pub claim_token: Uuid,
}

/// Result of an embedding attempt, committed by the vector writer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Generated { vector: Vec<f32> },
    Failed {
        failure: Failure,
        /// Next eligible attempt; `None` records a terminal failure.
        retry_at: Option<DateTime<Utc>>,
    },
}

/// What happened to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// Committed; carries the memory's status after the transition.
    Committed(ProcessingStatus),
    /// The claim was no longer valid (chunk deleted, reset or reclaimed).
    Discarded,
}

/// Result of recording an ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestResult {
    Committed(ProcessingStatus),
    /// Someone else already chunked (or failed) this memory.
    AlreadyIngested,
}

/// Counts from releasing expired claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Expired claims made eligible for another attempt.
    pub requeued: u64,
    /// Expired claims that had no attempts left.
    pub exhausted: u64,
    /// Memories whose tallies were rebuilt.
    pub reconciled: u64,
}

/// Repository trait for memories and their chunks.
pub trait MemoryRepository: Send + Sync {
    fn create(
        &self,
        memory: &Memory,
    ) -> impl std::future::Future<Output = Result<Memory, RepositoryError>> + Send;

    fn get_by_id(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Memory>, RepositoryError>> + Send;

    /// Memories in a space, newest first.
    fn list_by_space(
        &self,
        space_id: &Uuid,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Memory>, RepositoryError>> + Send;

    /// Chunks of a memory ordered by sequence number.
    fn list_chunks(
        &self,
        memory_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<MemoryChunk>, RepositoryError>> + Send;

    /// Delete a memory and, by cascade, its chunks. Outstanding claims die
    /// with the rows. Returns false if the memory did not exist.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Memories that still need to be fetched and chunked, oldest first.
    /// Memories waiting out an ingest retry are skipped until
    /// `next_ingest_at <= now`.
    fn list_unchunked(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Memory>, RepositoryError>> + Send;

    /// Insert the chunk rows for a memory and mark it chunked.
    ///
    /// Applies only while the memory is still unchunked.
    fn record_chunks(
        &self,
        memory_id: &Uuid,
        chunks: &[NewChunk],
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<IngestResult, RepositoryError>> + Send;

    /// Mark ingestion failed. Applies only while the memory is unchunked.
    fn record_ingest_failure(
        &self,
        memory_id: &Uuid,
        failure: &Failure,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<IngestResult, RepositoryError>> + Send;

    /// Record a transient ingestion failure: bump the ingest attempt count
    /// and hide the memory from `list_unchunked` until `retry_at`. Applies
    /// only while the memory is unchunked.
    fn schedule_ingest_retry(
        &self,
        memory_id: &Uuid,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<IngestResult, RepositoryError>> + Send;

    /// Atomically claim the next claimable chunk: PENDING, or FAILED with
    /// `next_attempt_at <= now`. Increments the attempt count.
    fn claim_next(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<ClaimedChunk>, RepositoryError>> + Send;

    /// Claim up to `limit` more claimable chunks whose space embeds with
    /// `embedding_model`, oldest first, in one transaction.
    fn claim_more(
        &self,
        embedding_model: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<ClaimedChunk>, RepositoryError>> + Send;

    /// Claim one specific chunk, under the same conditions as `claim_next`.
    fn claim_chunk(
        &self,
        chunk_id: &Uuid,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<ClaimedChunk>, RepositoryError>> + Send;

    /// Commit the outcome of a claimed attempt: vector and status (or
    /// failure and status) in one write, conditioned on the chunk still
    /// being PROCESSING under `claim.claim_token`.
    fn write_outcome(
        &self,
        claim: &ClaimedChunk,
        outcome: &ChunkOutcome,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<WriteResult, RepositoryError>> + Send;

    /// Reset chunks to PENDING with a fresh retry budget.
    ///
    /// `chunk_ids = None` targets every chunk of the memory. Fails with
    /// `NotFound` if a chunk does not belong to the memory and `Conflict`
    /// if a targeted chunk is mid-attempt.
    fn reset_chunks(
        &self,
        memory_id: &Uuid,
        chunk_ids: Option<&[Uuid]>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ProcessingStatus, RepositoryError>> + Send;

    /// Clear a failed ingestion so the memory is fetched and chunked again.
    fn reset_ingest(
        &self,
        memory_id: &Uuid,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ProcessingStatus, RepositoryError>> + Send;

    /// Release PROCESSING chunks claimed at or before `claimed_before`.
    ///
    /// A chunk with attempts left becomes due for retry at `now`; one that
    /// used its last attempt fails terminally. Only the owning memories'
    /// tallies are recounted.
    fn expire_claims(
        &self,
        max_attempts: u32,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<RecoveryReport, RepositoryError>> + Send;

    /// Startup recovery: `expire_claims`, then rebuild every memory's
    /// tallies and status from its chunk rows. Claims newer than
    /// `claimed_before` may belong to a live process and are left alone.
    fn recover(
        &self,
        max_attempts: u32,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<RecoveryReport, RepositoryError>> + Send;
}
