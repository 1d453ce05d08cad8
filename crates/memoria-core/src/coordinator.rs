//! Pipeline coordinator.
//!
//! Drives memories from submission to COMPLETED/FAILED:
//!
//! 1. `submit` records a PENDING memory.
//! 2. The ingest loop fetches unchunked memories, chunks them with the
//!    space's configuration and the embedder's input limit, and records the
//!    chunk rows.
//! 3. A bounded pool of embed workers claims chunks (PENDING, or FAILED and
//!    due for retry) in batches of up to the embedder's batch size, calls
//!    the embedder once per batch, and commits each outcome through the
//!    vector writer.
//! 4. A lease sweeper releases claims older than `claim_lease_ms`, so a
//!    chunk whose worker died is retried without a restart.
//!
//! The atomic claim guarantees at most one attempt in flight per chunk.
//! Retry state lives on the chunk row, so a restarted coordinator resumes
//! where the previous one stopped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use memoria_types::config::PipelineConfig;
use memoria_types::embedder::{Embedder, NewEmbedder};
use memoria_types::error::{EmbedError, ErrorCode, PipelineError, RepositoryError};
use memoria_types::memory::{
    ChunkStatusView, ChunkTally, Failure, IngestState, Memory, MemoryStatusReport, NewChunk,
    NewMemory, ProcessingStatus,
};
use memoria_types::space::{NewSpace, Space};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::embedding::{EmbeddingBackend, EmbeddingClient};
use crate::fetch::ContentFetcher;
use crate::limiter::EmbedderLimiter;
use crate::registry::EmbedderRegistry;
use crate::repository::embedder::EmbedderRepository;
use crate::repository::memory::{
    ChunkOutcome, ClaimedChunk, IngestResult, MemoryRepository, RecoveryReport, WriteResult,
};
use crate::repository::space::SpaceRepository;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::writer::VectorWriter;

/// Memories fetched per ingest pass.
const INGEST_BATCH: i64 = 16;

pub struct PipelineCoordinator<M, S, E, B, F>
where
    M: MemoryRepository + Clone,
    S: SpaceRepository,
    E: EmbedderRepository,
    B: EmbeddingBackend,
    F: ContentFetcher,
{
    memories: M,
    spaces: S,
    registry: EmbedderRegistry<E>,
    client: EmbeddingClient<B>,
    writer: VectorWriter<M>,
    fetcher: F,
    retry: RetryPolicy,
    config: PipelineConfig,
    /// Wakes idle loops when new work is submitted.
    wake: Notify,
}

impl<M, S, E, B, F> PipelineCoordinator<M, S, E, B, F>
where
    M: MemoryRepository + Clone + 'static,
    S: SpaceRepository + 'static,
    E: EmbedderRepository + 'static,
    B: EmbeddingBackend + 'static,
    F: ContentFetcher + 'static,
{
    pub fn new(
        memories: M,
        spaces: S,
        embedders: E,
        backend: B,
        fetcher: F,
        config: PipelineConfig,
    ) -> Self {
        let limiter = EmbedderLimiter::new(config.default_max_concurrency);
        let client = EmbeddingClient::new(
            backend,
            limiter,
            Duration::from_millis(config.default_request_timeout_ms),
        );
        Self {
            writer: VectorWriter::new(memories.clone()),
            memories,
            spaces,
            registry: EmbedderRegistry::new(embedders),
            client,
            fetcher,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &EmbedderRegistry<E> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Embedders and spaces
    // ------------------------------------------------------------------

    pub async fn register_embedder(
        &self,
        request: NewEmbedder,
        credentials: Option<&str>,
        created_by: Option<String>,
    ) -> Result<Embedder, PipelineError> {
        let embedder = self.registry.register(request, credentials, created_by).await?;
        tracing::info!(embedder = %embedder.name, provider = %embedder.provider_type, "embedder registered");
        Ok(embedder)
    }

    /// Create a space. The embedding model must resolve through the registry.
    pub async fn create_space(&self, request: NewSpace) -> Result<Space, PipelineError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "space name must not be empty".to_string(),
            ));
        }
        let chunking = request.chunking.unwrap_or(self.config.chunking);
        chunking.validate().map_err(PipelineError::InvalidArgument)?;
        let embedder = self.registry.lookup(&request.embedding_model).await?;

        let now = Utc::now();
        let space = Space {
            id: Uuid::now_v7(),
            name,
            embedding_model: embedder.name.clone(),
            chunking,
            created_at: now,
            updated_at: now,
            created_by: request.created_by.clone(),
            updated_by: request.created_by,
        };
        let space = self.spaces.create(&space).await.map_err(|e| match e {
            RepositoryError::Conflict(msg) => PipelineError::InvalidArgument(msg),
            other => PipelineError::Internal(other.to_string()),
        })?;
        tracing::info!(space_id = %space.id, embedder = %space.embedding_model, "space created");
        Ok(space)
    }

    pub async fn get_space(&self, id: &Uuid) -> Result<Space, PipelineError> {
        self.spaces
            .get_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("space", id))
    }

    /// Resolve a space by id or, failing that, by name.
    pub async fn find_space(&self, id_or_name: &str) -> Result<Space, PipelineError> {
        if let Ok(id) = id_or_name.parse::<Uuid>()
            && let Some(space) = self.spaces.get_by_id(&id).await?
        {
            return Ok(space);
        }
        self.spaces
            .get_by_name(id_or_name)
            .await?
            .ok_or_else(|| PipelineError::not_found("space", id_or_name))
    }

    pub async fn list_spaces(&self) -> Result<Vec<Space>, PipelineError> {
        Ok(self.spaces.list().await?)
    }

    // ------------------------------------------------------------------
    // Inbound pipeline API
    // ------------------------------------------------------------------

    /// Accept content for a space. Returns the new memory's id; chunking
    /// and embedding happen asynchronously.
    pub async fn submit(&self, request: NewMemory) -> Result<Uuid, PipelineError> {
        if request.content_ref.trim().is_empty() {
            return Err(PipelineError::InvalidArgument(
                "content_ref must not be empty".to_string(),
            ));
        }
        if request.content_type.trim().is_empty() {
            return Err(PipelineError::InvalidArgument(
                "content_type must not be empty".to_string(),
            ));
        }
        let space = self.get_space(&request.space_id).await?;

        let now = Utc::now();
        let memory = Memory {
            id: Uuid::now_v7(),
            space_id: space.id,
            content_ref: request.content_ref,
            content_type: request.content_type,
            metadata: request.metadata,
            processing_status: ProcessingStatus::Pending,
            ingest: IngestState::NotChunked,
            ingest_attempts: 0,
            next_ingest_at: None,
            tally: ChunkTally::default(),
            created_at: now,
            updated_at: now,
            created_by: request.created_by.clone(),
            updated_by: request.created_by,
        };
        let memory = self.memories.create(&memory).await?;
        tracing::info!(memory_id = %memory.id, space_id = %space.id, "memory submitted");
        self.wake.notify_waiters();
        Ok(memory.id)
    }

    /// Best-known aggregate status plus per-chunk detail.
    pub async fn get_status(&self, memory_id: &Uuid) -> Result<MemoryStatusReport, PipelineError> {
        let memory = self.get_memory(memory_id).await?;
        let chunks = self.memories.list_chunks(memory_id).await?;
        Ok(MemoryStatusReport {
            memory_id: memory.id,
            space_id: memory.space_id,
            processing_status: memory.processing_status,
            ingest: memory.ingest,
            ingest_attempts: memory.ingest_attempts,
            next_ingest_at: memory.next_ingest_at,
            tally: memory.tally,
            chunks: chunks.iter().map(ChunkStatusView::from).collect(),
        })
    }

    /// Reset the targeted chunks (all chunks when `chunk_ids` is `None` or
    /// empty) to PENDING. A memory whose ingestion failed is re-ingested.
    pub async fn reprocess(
        &self,
        memory_id: &Uuid,
        chunk_ids: Option<&[Uuid]>,
    ) -> Result<ProcessingStatus, PipelineError> {
        let memory = self.get_memory(memory_id).await?;
        let chunk_ids = chunk_ids.filter(|ids| !ids.is_empty());
        let now = Utc::now();

        let status = match (&memory.ingest, chunk_ids) {
            (IngestState::Failed { .. }, Some(ids)) => {
                return Err(PipelineError::not_found("chunk", ids[0]));
            }
            (IngestState::Failed { .. }, None) => self.memories.reset_ingest(memory_id, now).await,
            (_, ids) => self.memories.reset_chunks(memory_id, ids, now).await,
        }
        .map_err(|e| match e {
            RepositoryError::NotFound => {
                PipelineError::not_found("chunk", format!("of memory {memory_id}"))
            }
            RepositoryError::Conflict(msg) => PipelineError::InvalidArgument(msg),
            other => PipelineError::Internal(other.to_string()),
        })?;

        tracing::info!(memory_id = %memory_id, status = %status, "memory reprocessing requested");
        self.wake.notify_waiters();
        Ok(status)
    }

    /// Delete a memory and its chunks. In-flight attempts for its chunks
    /// finish but their results are discarded.
    pub async fn delete_memory(&self, memory_id: &Uuid) -> Result<(), PipelineError> {
        if !self.memories.delete(memory_id).await? {
            return Err(PipelineError::not_found("memory", memory_id));
        }
        tracing::info!(memory_id = %memory_id, "memory deleted");
        Ok(())
    }

    pub async fn list_memories(&self, space_id: &Uuid, limit: i64) -> Result<Vec<Memory>, PipelineError> {
        self.get_space(space_id).await?;
        Ok(self.memories.list_by_space(space_id, limit).await?)
    }

    async fn get_memory(&self, id: &Uuid) -> Result<Memory, PipelineError> {
        self.memories
            .get_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("memory", id))
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Fetch and chunk one memory.
    ///
    /// Transient problems (fetch timeouts, upstream errors, storage hiccups)
    /// schedule another ingest attempt with backoff until the retry budget
    /// runs out. Content problems (missing content, unsupported type,
    /// invalid text, unknown embedder) fail the memory at once. Only errors
    /// recording the result are returned.
    pub async fn ingest(&self, memory: &Memory) -> Result<IngestResult, PipelineError> {
        let now = Utc::now();
        let result = match self.prepare_chunks(memory).await {
            Ok(chunks) => {
                let count = chunks.len();
                let result = self.memories.record_chunks(&memory.id, &chunks, now).await?;
                tracing::info!(memory_id = %memory.id, chunks = count, "memory chunked");
                result
            }
            Err(e) => self.ingest_failed(memory, e, now).await?,
        };
        if matches!(result, IngestResult::Committed(_)) {
            self.wake.notify_waiters();
        }
        Ok(result)
    }

    async fn ingest_failed(
        &self,
        memory: &Memory,
        error: PipelineError,
        now: DateTime<Utc>,
    ) -> Result<IngestResult, PipelineError> {
        let attempt = memory.ingest_attempts + 1;
        match self.retry.decide(attempt, &classify(&error), now) {
            RetryDecision::RetryAt(at) => {
                tracing::warn!(
                    memory_id = %memory.id,
                    attempt,
                    code = %error.code(),
                    retry_at = %at,
                    error = %error,
                    "transient ingestion failure, retry scheduled"
                );
                Ok(self.memories.schedule_ingest_retry(&memory.id, at, now).await?)
            }
            RetryDecision::GiveUp => {
                tracing::warn!(memory_id = %memory.id, attempt, code = %error.code(), error = %error, "ingestion failed");
                let failure = Failure::new(error.code(), error.to_string());
                Ok(self
                    .memories
                    .record_ingest_failure(&memory.id, &failure, now)
                    .await?)
            }
        }
    }

    async fn prepare_chunks(&self, memory: &Memory) -> Result<Vec<NewChunk>, PipelineError> {
        let space = self.get_space(&memory.space_id).await?;
        let embedder = self.registry.lookup(&space.embedding_model).await?;
        let content = self.fetcher.fetch(&memory.content_ref).await?;
        let content_type = content
            .content_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&memory.content_type);
        let chunker = Chunker::new(space.chunking, embedder.max_sequence_length)?;
        chunker.chunk(&content.bytes, content_type)
    }

    /// Ingest up to one batch of unchunked memories. Returns how many were
    /// handled.
    pub async fn ingest_pending(&self) -> Result<usize, PipelineError> {
        let pending = self.memories.list_unchunked(INGEST_BATCH, Utc::now()).await?;
        for memory in &pending {
            self.ingest(memory).await?;
        }
        Ok(pending.len())
    }

    // ------------------------------------------------------------------
    // Embedding
    // ------------------------------------------------------------------

    /// Claim a batch of chunks for one embedder and process it. The batch
    /// holds the next claimable chunk plus up to `batch_size - 1` more
    /// chunks bound to the same embedder. Returns `None` when nothing is
    /// claimable, otherwise one result per claimed chunk.
    pub async fn process_next(&self) -> Result<Option<Vec<WriteResult>>, PipelineError> {
        let now = Utc::now();
        let Some(first) = self.memories.claim_next(now).await? else {
            return Ok(None);
        };

        let embedder = match self.registry.lookup(&first.embedding_model).await {
            Ok(embedder) => embedder,
            Err(e) => return self.fail_unresolved(&first, e).await.map(Some),
        };

        let mut claims = vec![first];
        let room = embedder.batch_size().saturating_sub(1);
        if room > 0 {
            match self.memories.claim_more(&embedder.name, room as i64, now).await {
                Ok(more) => claims.extend(more),
                Err(e) => {
                    tracing::warn!(embedder = %embedder.name, error = %e, "could not extend batch, embedding a single chunk")
                }
            }
        }
        self.process_claims(&embedder, &claims).await.map(Some)
    }

    /// The claimed chunk's embedder could not be resolved. An unknown or
    /// unusable embedder fails the chunk for good; a lookup that failed in
    /// storage is retried like any transient error.
    async fn fail_unresolved(
        &self,
        claim: &ClaimedChunk,
        error: PipelineError,
    ) -> Result<Vec<WriteResult>, PipelineError> {
        let outcome = self.failure_outcome(claim, &claim.embedding_model, classify(&error));
        let result = self
            .memories
            .write_outcome(claim, &outcome, Utc::now())
            .await?;
        Ok(vec![result])
    }

    /// Run one embedding attempt for a batch of claims on `embedder` and
    /// commit every outcome. Chunks over the embedder's input limit fail
    /// on their own; the rest share one provider call and its result.
    pub async fn process_claims(
        &self,
        embedder: &Embedder,
        claims: &[ClaimedChunk],
    ) -> Result<Vec<WriteResult>, PipelineError> {
        let mut outcomes = Vec::with_capacity(claims.len());
        let mut batch = Vec::with_capacity(claims.len());
        for claim in claims {
            match check_input_length(embedder, claim) {
                Ok(()) => batch.push(claim),
                Err(e) => outcomes.push((claim, self.failure_outcome(claim, &embedder.name, e))),
            }
        }

        if !batch.is_empty() {
            let texts: Vec<String> = batch.iter().map(|c| c.chunk_text.clone()).collect();
            match self.client.embed(embedder, &texts).await {
                Ok(vectors) => outcomes.extend(
                    batch
                        .into_iter()
                        .zip(vectors)
                        .map(|(claim, vector)| (claim, ChunkOutcome::Generated { vector })),
                ),
                Err(error) => {
                    for claim in batch {
                        outcomes.push((claim, self.failure_outcome(claim, &embedder.name, error.clone())));
                    }
                }
            }
        }

        let now = Utc::now();
        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (claim, outcome) in outcomes {
            match self.writer.commit(claim, embedder, outcome, now).await {
                Ok(result) => results.push(result),
                // The claim stays PROCESSING until its lease runs out.
                Err(e) => {
                    tracing::error!(chunk_id = %claim.chunk_id, error = %e, "committing chunk outcome failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    fn failure_outcome(&self, claim: &ClaimedChunk, embedder: &str, error: EmbedError) -> ChunkOutcome {
        let decision = self.retry.decide(claim.attempt, &error, Utc::now());
        let retry_at = match decision {
            RetryDecision::RetryAt(at) => {
                tracing::warn!(
                    chunk_id = %claim.chunk_id,
                    embedder,
                    attempt = claim.attempt,
                    code = %error.code,
                    retry_at = %at,
                    "transient embedding failure, retry scheduled"
                );
                Some(at)
            }
            RetryDecision::GiveUp => {
                tracing::error!(
                    chunk_id = %claim.chunk_id,
                    embedder,
                    attempt = claim.attempt,
                    code = %error.code,
                    transient = error.is_transient(),
                    error = %error.message,
                    "chunk failed"
                );
                None
            }
        };
        ChunkOutcome::Failed {
            failure: Failure::new(error.code, error.message),
            retry_at,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Claims made at or before the returned instant have expired.
    fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::try_milliseconds(self.config.claim_lease_ms.min(i64::MAX as u64) as i64)
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Release claims older than the lease and rebuild every memory's
    /// tallies from its chunk rows. Younger claims may belong to another
    /// live process and are left to the lease sweeper.
    pub async fn recover(&self) -> Result<RecoveryReport, PipelineError> {
        let now = Utc::now();
        let report = self
            .memories
            .recover(self.retry.max_attempts(), self.lease_cutoff(now), now)
            .await?;
        tracing::info!(
            requeued = report.requeued,
            exhausted = report.exhausted,
            reconciled = report.reconciled,
            "recovery complete"
        );
        Ok(report)
    }

    /// Release claims whose lease has run out.
    pub async fn expire_claims(&self) -> Result<RecoveryReport, PipelineError> {
        let now = Utc::now();
        let report = self
            .memories
            .expire_claims(self.retry.max_attempts(), self.lease_cutoff(now), now)
            .await?;
        if report.requeued + report.exhausted > 0 {
            tracing::warn!(
                requeued = report.requeued,
                exhausted = report.exhausted,
                "released expired chunk claims"
            );
            self.wake.notify_waiters();
        }
        Ok(report)
    }

    /// Run recovery, then the ingest loop, the lease sweeper and the embed
    /// worker pool until `cancel` fires. Workers finish their current unit
    /// of work before stopping.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.recover().await?;

        let mut workers = JoinSet::new();
        let ingest = Arc::clone(&self);
        let token = cancel.clone();
        workers.spawn(
            async move { ingest.ingest_loop(token).await }
                .instrument(tracing::info_span!("ingest_worker")),
        );
        let sweeper = Arc::clone(&self);
        let token = cancel.clone();
        workers.spawn(
            async move { sweeper.lease_loop(token).await }
                .instrument(tracing::info_span!("lease_sweeper")),
        );
        for n in 0..self.config.workers {
            let worker = Arc::clone(&self);
            let token = cancel.clone();
            workers.spawn(
                async move { worker.embed_loop(token).await }
                    .instrument(tracing::info_span!("embed_worker", worker = n)),
            );
        }
        tracing::info!(workers = self.config.workers, "pipeline running");

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "pipeline worker panicked");
            }
        }
        tracing::info!("pipeline stopped");
        Ok(())
    }

    async fn ingest_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let handled = match self.ingest_pending().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "ingest pass failed");
                    0
                }
            };
            if handled == 0 {
                self.idle(&cancel).await;
            }
        }
    }

    async fn lease_loop(&self, cancel: CancellationToken) {
        let period = Duration::from_millis((self.config.claim_lease_ms / 4).max(self.config.poll_interval_ms));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and recovery just ran.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.expire_claims().await {
                        tracing::error!(error = %e, "lease sweep failed");
                    }
                }
            }
        }
    }

    async fn embed_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self.process_next().await {
                Ok(Some(_)) => {}
                Ok(None) => self.idle(&cancel).await,
                Err(e) => {
                    tracing::error!(error = %e, "embedding pass failed");
                    self.idle(&cancel).await;
                }
            }
        }
    }

    async fn idle(&self, cancel: &CancellationToken) {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Chunks longer than the embedder accepts fail without a provider call.
fn check_input_length(embedder: &Embedder, claim: &ClaimedChunk) -> Result<(), EmbedError> {
    match embedder.max_sequence_length {
        Some(limit) if claim.chunk_text.len() > limit as usize => Err(EmbedError::permanent(
            ErrorCode::InvalidArgument,
            format!(
                "chunk of {} bytes exceeds the input limit of {limit} bytes",
                claim.chunk_text.len()
            ),
        )),
        _ => Ok(()),
    }
}

/// Map a pipeline error onto the retry classification: timeouts, upstream
/// and storage errors are transient, missing or unusable input is not.
fn classify(error: &PipelineError) -> EmbedError {
    match error.code() {
        code @ (ErrorCode::DeadlineExceeded | ErrorCode::Internal | ErrorCode::ResourceExhausted) => {
            EmbedError::transient(code, error.to_string())
        }
        code => EmbedError::permanent(code, error.to_string()),
    }
}
