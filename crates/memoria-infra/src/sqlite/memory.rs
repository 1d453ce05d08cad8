//! SQLite memory and chunk repository implementation.
//!
//! Every chunk transition runs in one transaction on the single writer
//! connection together with the owning memory's tally and status update.
//! Vectors are stored as little-endian `f32` blobs.

use chrono::{DateTime, Utc};
use memoria_core::repository::memory::{
    ChunkOutcome, ClaimedChunk, IngestResult, MemoryRepository, RecoveryReport, WriteResult,
};
use memoria_core::status::{apply_transition, derive_status};
use memoria_types::attributes::Metadata;
use memoria_types::error::{ErrorCode, RepositoryError};
use memoria_types::memory::{
    ChunkBucket, ChunkTally, Failure, IngestState, Memory, MemoryChunk, NewChunk,
    ProcessingStatus, VectorStatus,
};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::pool::{DatabasePool, format_datetime, parse_datetime, query_error};

/// Reason recorded on chunks whose claim lease ran out.
const EXPIRED_REASON: &str = "claim lease expired before the attempt reported back";

/// SQLite-backed implementation of `MemoryRepository`.
#[derive(Clone)]
pub struct SqliteMemoryRepository {
    pool: DatabasePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct MemoryRow {
    id: String,
    space_id: String,
    content_ref: String,
    content_type: String,
    metadata: String,
    processing_status: String,
    ingest: IngestColumns,
    ingest_attempts: i64,
    next_ingest_at: Option<String>,
    tally: ChunkTally,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    updated_by: Option<String>,
}

/// The three columns that together encode a memory's `IngestState`.
struct IngestColumns {
    chunked_at: Option<String>,
    error_code: Option<String>,
    error: Option<String>,
}

impl IngestColumns {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            chunked_at: row.try_get("chunked_at")?,
            error_code: row.try_get("ingest_error_code")?,
            error: row.try_get("ingest_error")?,
        })
    }

    fn into_state(self) -> Result<IngestState, RepositoryError> {
        if let Some(code) = self.error_code {
            let code: ErrorCode = code.parse().map_err(RepositoryError::Query)?;
            return Ok(IngestState::Failed {
                failure: Failure::new(code, self.error.unwrap_or_default()),
            });
        }
        match self.chunked_at {
            Some(at) => Ok(IngestState::Chunked {
                at: parse_datetime(&at)?,
            }),
            None => Ok(IngestState::NotChunked),
        }
    }
}

fn tally_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkTally, sqlx::Error> {
    let count = |column: &str| -> Result<u32, sqlx::Error> {
        let value: i64 = row.try_get(column)?;
        Ok(value.max(0) as u32)
    };
    Ok(ChunkTally {
        pending: count("chunks_pending")?,
        processing: count("chunks_processing")?,
        generated: count("chunks_generated")?,
        retrying: count("chunks_retrying")?,
        failed: count("chunks_failed")?,
    })
}

impl MemoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            space_id: row.try_get("space_id")?,
            content_ref: row.try_get("content_ref")?,
            content_type: row.try_get("content_type")?,
            metadata: row.try_get("metadata")?,
            processing_status: row.try_get("processing_status")?,
            ingest: IngestColumns::from_row(row)?,
            ingest_attempts: row.try_get("ingest_attempts")?,
            next_ingest_at: row.try_get("next_ingest_at")?,
            tally: tally_from_row(row)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
        })
    }

    fn into_memory(self) -> Result<Memory, RepositoryError> {
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid metadata JSON: {e}")))?;
        Ok(Memory {
            id: parse_uuid(&self.id)?,
            space_id: parse_uuid(&self.space_id)?,
            content_ref: self.content_ref,
            content_type: self.content_type,
            metadata,
            processing_status: self
                .processing_status
                .parse()
                .map_err(RepositoryError::Query)?,
            ingest: self.ingest.into_state()?,
            ingest_attempts: self.ingest_attempts.max(0) as u32,
            next_ingest_at: self.next_ingest_at.as_deref().map(parse_datetime).transpose()?,
            tally: self.tally,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

struct ChunkRow {
    id: String,
    memory_id: String,
    sequence_number: i64,
    chunk_text: String,
    embedding_vector: Option<Vec<u8>>,
    vector_status: String,
    start_offset: i64,
    end_offset: i64,
    attempt_count: i64,
    next_attempt_at: Option<String>,
    failure_code: Option<String>,
    failure_reason: Option<String>,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    updated_by: Option<String>,
    /// Dimensionality of the space's embedder; stored vectors must match.
    dimensionality: i64,
}

impl ChunkRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            memory_id: row.try_get("memory_id")?,
            sequence_number: row.try_get("sequence_number")?,
            chunk_text: row.try_get("chunk_text")?,
            embedding_vector: row.try_get("embedding_vector")?,
            vector_status: row.try_get("vector_status")?,
            start_offset: row.try_get("start_offset")?,
            end_offset: row.try_get("end_offset")?,
            attempt_count: row.try_get("attempt_count")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            failure_code: row.try_get("failure_code")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            dimensionality: row.try_get("dimensionality")?,
        })
    }

    fn into_chunk(self) -> Result<MemoryChunk, RepositoryError> {
        let dimensionality = self.dimensionality.max(0) as usize;
        let failure = match self.failure_code {
            Some(code) => Some(Failure::new(
                code.parse().map_err(RepositoryError::Query)?,
                self.failure_reason.unwrap_or_default(),
            )),
            None => None,
        };
        Ok(MemoryChunk {
            id: parse_uuid(&self.id)?,
            memory_id: parse_uuid(&self.memory_id)?,
            sequence_number: self.sequence_number as u32,
            chunk_text: self.chunk_text,
            embedding_vector: self
                .embedding_vector
                .as_deref()
                .map(|bytes| decode_vector(bytes, dimensionality))
                .transpose()?,
            vector_status: self.vector_status.parse().map_err(RepositoryError::Query)?,
            start_offset: self.start_offset as u64,
            end_offset: self.end_offset as u64,
            attempt_count: self.attempt_count as u32,
            next_attempt_at: self.next_attempt_at.as_deref().map(parse_datetime).transpose()?,
            failure,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid id '{s}': {e}")))
}

pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a vector blob that must hold exactly `dimensionality` floats.
pub(crate) fn decode_vector(bytes: &[u8], dimensionality: usize) -> Result<Vec<f32>, RepositoryError> {
    if bytes.len() != dimensionality * 4 {
        return Err(RepositoryError::Query(format!(
            "vector blob of {} bytes does not hold {dimensionality} f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Bucket for a tally row grouped by status and whether a retry is scheduled.
fn bucket_for(status: VectorStatus, scheduled: bool) -> ChunkBucket {
    match status {
        VectorStatus::Failed if scheduled => ChunkBucket::Retrying,
        other => ChunkBucket::of(other, None),
    }
}

/// Load a memory's ingest state and tally inside a transaction.
async fn load_aggregate(
    conn: &mut SqliteConnection,
    memory_id: &str,
) -> Result<Option<(IngestState, ChunkTally)>, RepositoryError> {
    let row = sqlx::query(
        "SELECT chunked_at, ingest_error_code, ingest_error, chunks_pending, chunks_processing, chunks_generated, chunks_retrying, chunks_failed
         FROM memories WHERE id = ?",
    )
    .bind(memory_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(query_error)?;

    row.map(|row| {
        let ingest = IngestColumns::from_row(&row)
            .map_err(query_error)?
            .into_state()?;
        let tally = tally_from_row(&row).map_err(query_error)?;
        Ok((ingest, tally))
    })
    .transpose()
}

async fn store_aggregate(
    conn: &mut SqliteConnection,
    memory_id: &str,
    tally: &ChunkTally,
    status: ProcessingStatus,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE memories SET chunks_pending = ?, chunks_processing = ?, chunks_generated = ?, chunks_retrying = ?, chunks_failed = ?, processing_status = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(i64::from(tally.pending))
    .bind(i64::from(tally.processing))
    .bind(i64::from(tally.generated))
    .bind(i64::from(tally.retrying))
    .bind(i64::from(tally.failed))
    .bind(status.to_string())
    .bind(format_datetime(&now))
    .bind(memory_id)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;
    Ok(())
}

/// Move one chunk of `memory_id` between buckets and persist the new
/// aggregate.
async fn transition(
    conn: &mut SqliteConnection,
    memory_id: &str,
    from: ChunkBucket,
    to: ChunkBucket,
    now: DateTime<Utc>,
) -> Result<ProcessingStatus, RepositoryError> {
    let (ingest, mut tally) = load_aggregate(conn, memory_id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    let status = apply_transition(&ingest, &mut tally, from, to);
    store_aggregate(conn, memory_id, &tally, status, now).await?;
    Ok(status)
}

/// Recount a memory's chunks from their rows and persist the aggregate.
/// Returns the new status and whether anything changed.
async fn rescan(
    conn: &mut SqliteConnection,
    memory_id: &str,
    now: DateTime<Utc>,
) -> Result<(ProcessingStatus, bool), RepositoryError> {
    let row = sqlx::query("SELECT processing_status FROM memories WHERE id = ?")
        .bind(memory_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?
        .ok_or(RepositoryError::NotFound)?;
    let stored_status: String = row.try_get("processing_status").map_err(query_error)?;

    let (ingest, stored_tally) = load_aggregate(conn, memory_id)
        .await?
        .ok_or(RepositoryError::NotFound)?;

    let groups = sqlx::query(
        "SELECT vector_status, (next_attempt_at IS NOT NULL) AS scheduled, COUNT(*) AS n
         FROM memory_chunks WHERE memory_id = ? GROUP BY vector_status, scheduled",
    )
    .bind(memory_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(query_error)?;

    let mut tally = ChunkTally::default();
    for group in &groups {
        let status: String = group.try_get("vector_status").map_err(query_error)?;
        let scheduled: i64 = group.try_get("scheduled").map_err(query_error)?;
        let n: i64 = group.try_get("n").map_err(query_error)?;
        let bucket = bucket_for(status.parse().map_err(RepositoryError::Query)?, scheduled != 0);
        for _ in 0..n {
            tally.add(bucket);
        }
    }

    let status = derive_status(&ingest, &tally);
    let changed = tally != stored_tally || stored_status != status.to_string();
    if changed {
        store_aggregate(conn, memory_id, &tally, status, now).await?;
    }
    Ok((status, changed))
}

/// Claim `chunk_id` if it is claimable at `now`.
async fn claim_in_tx(
    conn: &mut SqliteConnection,
    chunk_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<ClaimedChunk>, RepositoryError> {
    let now_str = format_datetime(&now);
    let row = sqlx::query(
        "SELECT c.id, c.memory_id, c.sequence_number, c.chunk_text, c.vector_status, c.next_attempt_at, c.attempt_count, m.space_id, s.embedding_model
         FROM memory_chunks c
         JOIN memories m ON m.id = c.memory_id
         JOIN spaces s ON s.id = m.space_id
         WHERE c.id = ?
           AND (c.vector_status = 'PENDING'
                OR (c.vector_status = 'FAILED' AND c.next_attempt_at IS NOT NULL AND c.next_attempt_at <= ?))",
    )
    .bind(chunk_id)
    .bind(&now_str)
    .fetch_optional(&mut *conn)
    .await
    .map_err(query_error)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.try_get("vector_status").map_err(query_error)?;
    let next_attempt_at: Option<String> = row.try_get("next_attempt_at").map_err(query_error)?;
    let from = bucket_for(
        status.parse().map_err(RepositoryError::Query)?,
        next_attempt_at.is_some(),
    );
    let memory_id: String = row.try_get("memory_id").map_err(query_error)?;
    let space_id: String = row.try_get("space_id").map_err(query_error)?;
    let attempt_count: i64 = row.try_get("attempt_count").map_err(query_error)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(query_error)?;
    let claim_token = Uuid::now_v7();

    sqlx::query(
        "UPDATE memory_chunks
         SET vector_status = 'PROCESSING', claim_token = ?, claimed_at = ?, attempt_count = attempt_count + 1, next_attempt_at = NULL, updated_at = ?
         WHERE id = ?",
    )
    .bind(claim_token.to_string())
    .bind(&now_str)
    .bind(&now_str)
    .bind(chunk_id)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    transition(conn, &memory_id, from, ChunkBucket::Processing, now).await?;

    Ok(Some(ClaimedChunk {
        chunk_id: parse_uuid(chunk_id)?,
        memory_id: parse_uuid(&memory_id)?,
        space_id: parse_uuid(&space_id)?,
        embedding_model: row.try_get("embedding_model").map_err(query_error)?,
        sequence_number: sequence_number as u32,
        chunk_text: row.try_get("chunk_text").map_err(query_error)?,
        attempt: attempt_count as u32 + 1,
        claim_token,
    }))
}

/// Release PROCESSING chunks claimed at or before `claimed_before`.
/// Returns (requeued, exhausted, affected memory ids).
async fn expire_in_tx(
    conn: &mut SqliteConnection,
    max_attempts: u32,
    claimed_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(u64, u64, Vec<String>), RepositoryError> {
    let before = format_datetime(&claimed_before);
    let now_str = format_datetime(&now);

    let affected: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT memory_id FROM memory_chunks
         WHERE vector_status = 'PROCESSING' AND claimed_at <= ?",
    )
    .bind(&before)
    .fetch_all(&mut *conn)
    .await
    .map_err(query_error)?;

    let requeued = sqlx::query(
        "UPDATE memory_chunks
         SET vector_status = 'FAILED', failure_code = 'INTERNAL', failure_reason = ?, next_attempt_at = ?,
             claim_token = NULL, claimed_at = NULL, updated_at = ?
         WHERE vector_status = 'PROCESSING' AND claimed_at <= ? AND attempt_count < ?",
    )
    .bind(EXPIRED_REASON)
    .bind(&now_str)
    .bind(&now_str)
    .bind(&before)
    .bind(i64::from(max_attempts))
    .execute(&mut *conn)
    .await
    .map_err(query_error)?
    .rows_affected();

    let exhausted = sqlx::query(
        "UPDATE memory_chunks
         SET vector_status = 'FAILED', failure_code = 'INTERNAL', failure_reason = ?, next_attempt_at = NULL,
             claim_token = NULL, claimed_at = NULL, updated_at = ?
         WHERE vector_status = 'PROCESSING' AND claimed_at <= ?",
    )
    .bind(EXPIRED_REASON)
    .bind(&now_str)
    .bind(&before)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?
    .rows_affected();

    Ok((
        requeued,
        exhausted,
        affected.into_iter().map(|(id,)| id).collect(),
    ))
}

impl MemoryRepository for SqliteMemoryRepository {
    async fn create(&self, memory: &Memory) -> Result<Memory, RepositoryError> {
        let metadata = serde_json::to_string(&memory.metadata)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO memories (id, space_id, content_ref, content_type, metadata, processing_status, created_at, updated_at, created_by, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(memory.id.to_string())
        .bind(memory.space_id.to_string())
        .bind(&memory.content_ref)
        .bind(&memory.content_type)
        .bind(&metadata)
        .bind(memory.processing_status.to_string())
        .bind(format_datetime(&memory.created_at))
        .bind(format_datetime(&memory.updated_at))
        .bind(&memory.created_by)
        .bind(&memory.updated_by)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(memory.clone())
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<Memory>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| MemoryRow::from_row(&row).map_err(query_error)?.into_memory())
            .transpose()
    }

    async fn list_by_space(&self, space_id: &Uuid, limit: i64) -> Result<Vec<Memory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM memories WHERE space_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(space_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut memories = Vec::with_capacity(rows.len());
        for row in &rows {
            memories.push(MemoryRow::from_row(row).map_err(query_error)?.into_memory()?);
        }
        Ok(memories)
    }

    async fn list_chunks(&self, memory_id: &Uuid) -> Result<Vec<MemoryChunk>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT c.*, e.dimensionality
             FROM memory_chunks c
             JOIN memories m ON m.id = c.memory_id
             JOIN spaces s ON s.id = m.space_id
             JOIN embedders e ON e.name = s.embedding_model
             WHERE c.memory_id = ?
             ORDER BY c.sequence_number ASC",
        )
        .bind(memory_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            chunks.push(ChunkRow::from_row(row).map_err(query_error)?.into_chunk()?);
        }
        Ok(chunks)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unchunked(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<Memory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM memories
             WHERE chunked_at IS NULL AND ingest_error_code IS NULL
               AND (next_ingest_at IS NULL OR next_ingest_at <= ?)
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(format_datetime(&now))
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut memories = Vec::with_capacity(rows.len());
        for row in &rows {
            memories.push(MemoryRow::from_row(row).map_err(query_error)?.into_memory()?);
        }
        Ok(memories)
    }

    async fn record_chunks(
        &self,
        memory_id: &Uuid,
        chunks: &[NewChunk],
        now: DateTime<Utc>,
    ) -> Result<IngestResult, RepositoryError> {
        let id = memory_id.to_string();
        let now_str = format_datetime(&now);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let (ingest, _) = load_aggregate(&mut tx, &id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        if ingest != IngestState::NotChunked {
            return Ok(IngestResult::AlreadyIngested);
        }

        let mut tally = ChunkTally::default();
        for chunk in chunks {
            let (status, code, reason) = match &chunk.failure {
                Some(failure) => (
                    VectorStatus::Failed,
                    Some(failure.code.to_string()),
                    Some(failure.message.clone()),
                ),
                None => (VectorStatus::Pending, None, None),
            };
            sqlx::query(
                "INSERT INTO memory_chunks (id, memory_id, sequence_number, chunk_text, vector_status, start_offset, end_offset, failure_code, failure_reason, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::now_v7().to_string())
            .bind(&id)
            .bind(i64::from(chunk.sequence_number))
            .bind(&chunk.chunk_text)
            .bind(status.to_string())
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(code)
            .bind(reason)
            .bind(&now_str)
            .bind(&now_str)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
            tally.add(ChunkBucket::of(status, None));
        }

        sqlx::query("UPDATE memories SET chunked_at = ?, next_ingest_at = NULL WHERE id = ?")
            .bind(&now_str)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        let status = derive_status(&IngestState::Chunked { at: now }, &tally);
        store_aggregate(&mut tx, &id, &tally, status, now).await?;
        tx.commit().await.map_err(query_error)?;

        Ok(IngestResult::Committed(status))
    }

    async fn record_ingest_failure(
        &self,
        memory_id: &Uuid,
        failure: &Failure,
        now: DateTime<Utc>,
    ) -> Result<IngestResult, RepositoryError> {
        let result = sqlx::query(
            "UPDATE memories SET ingest_error_code = ?, ingest_error = ?, next_ingest_at = NULL, processing_status = 'FAILED', updated_at = ?
             WHERE id = ? AND chunked_at IS NULL AND ingest_error_code IS NULL",
        )
        .bind(failure.code.to_string())
        .bind(&failure.message)
        .bind(format_datetime(&now))
        .bind(memory_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(IngestResult::Committed(ProcessingStatus::Failed));
        }
        match self.get_by_id(memory_id).await? {
            Some(_) => Ok(IngestResult::AlreadyIngested),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn schedule_ingest_retry(
        &self,
        memory_id: &Uuid,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<IngestResult, RepositoryError> {
        let result = sqlx::query(
            "UPDATE memories SET ingest_attempts = ingest_attempts + 1, next_ingest_at = ?, updated_at = ?
             WHERE id = ? AND chunked_at IS NULL AND ingest_error_code IS NULL",
        )
        .bind(format_datetime(&retry_at))
        .bind(format_datetime(&now))
        .bind(memory_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(IngestResult::Committed(ProcessingStatus::Pending));
        }
        match self.get_by_id(memory_id).await? {
            Some(_) => Ok(IngestResult::AlreadyIngested),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ClaimedChunk>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let candidate: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM memory_chunks
             WHERE vector_status = 'PENDING'
                OR (vector_status = 'FAILED' AND next_attempt_at IS NOT NULL AND next_attempt_at <= ?)
             ORDER BY created_at ASC, sequence_number ASC
             LIMIT 1",
        )
        .bind(format_datetime(&now))
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        let Some((chunk_id,)) = candidate else {
            return Ok(None);
        };
        let claim = claim_in_tx(&mut tx, &chunk_id, now).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(claim)
    }

    async fn claim_more(
        &self,
        embedding_model: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedChunk>, RepositoryError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let candidates: Vec<(String,)> = sqlx::query_as(
            "SELECT c.id FROM memory_chunks c
             JOIN memories m ON m.id = c.memory_id
             JOIN spaces s ON s.id = m.space_id
             WHERE s.embedding_model = ?
               AND (c.vector_status = 'PENDING'
                    OR (c.vector_status = 'FAILED' AND c.next_attempt_at IS NOT NULL AND c.next_attempt_at <= ?))
             ORDER BY c.created_at ASC, c.sequence_number ASC
             LIMIT ?",
        )
        .bind(embedding_model)
        .bind(format_datetime(&now))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(query_error)?;

        let mut claims = Vec::with_capacity(candidates.len());
        for (chunk_id,) in &candidates {
            if let Some(claim) = claim_in_tx(&mut tx, chunk_id, now).await? {
                claims.push(claim);
            }
        }
        tx.commit().await.map_err(query_error)?;
        Ok(claims)
    }

    async fn claim_chunk(
        &self,
        chunk_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedChunk>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let claim = claim_in_tx(&mut tx, &chunk_id.to_string(), now).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(claim)
    }

    async fn write_outcome(
        &self,
        claim: &ClaimedChunk,
        outcome: &ChunkOutcome,
        now: DateTime<Utc>,
    ) -> Result<WriteResult, RepositoryError> {
        let now_str = format_datetime(&now);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let (result, to) = match outcome {
            ChunkOutcome::Generated { vector } => {
                let result = sqlx::query(
                    "UPDATE memory_chunks
                     SET vector_status = 'GENERATED', embedding_vector = ?, failure_code = NULL, failure_reason = NULL,
                         next_attempt_at = NULL, claim_token = NULL, claimed_at = NULL, updated_at = ?
                     WHERE id = ? AND claim_token = ? AND vector_status = 'PROCESSING'",
                )
                .bind(encode_vector(vector))
                .bind(&now_str)
                .bind(claim.chunk_id.to_string())
                .bind(claim.claim_token.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
                (result, ChunkBucket::Generated)
            }
            ChunkOutcome::Failed { failure, retry_at } => {
                let result = sqlx::query(
                    "UPDATE memory_chunks
                     SET vector_status = 'FAILED', embedding_vector = NULL, failure_code = ?, failure_reason = ?,
                         next_attempt_at = ?, claim_token = NULL, claimed_at = NULL, updated_at = ?
                     WHERE id = ? AND claim_token = ? AND vector_status = 'PROCESSING'",
                )
                .bind(failure.code.to_string())
                .bind(&failure.message)
                .bind(retry_at.as_ref().map(format_datetime))
                .bind(&now_str)
                .bind(claim.chunk_id.to_string())
                .bind(claim.claim_token.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
                (result, ChunkBucket::of(VectorStatus::Failed, *retry_at))
            }
        };

        if result.rows_affected() == 0 {
            return Ok(WriteResult::Discarded);
        }

        let status = transition(
            &mut tx,
            &claim.memory_id.to_string(),
            ChunkBucket::Processing,
            to,
            now,
        )
        .await?;
        tx.commit().await.map_err(query_error)?;
        Ok(WriteResult::Committed(status))
    }

    async fn reset_chunks(
        &self,
        memory_id: &Uuid,
        chunk_ids: Option<&[Uuid]>,
        now: DateTime<Utc>,
    ) -> Result<ProcessingStatus, RepositoryError> {
        let id = memory_id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        if load_aggregate(&mut tx, &id).await?.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, vector_status FROM memory_chunks WHERE memory_id = ?")
                .bind(&id)
                .fetch_all(&mut *tx)
                .await
                .map_err(query_error)?;

        let targets: Vec<&(String, String)> = match chunk_ids {
            Some(ids) => {
                let mut targets = Vec::with_capacity(ids.len());
                for chunk_id in ids {
                    let chunk_id = chunk_id.to_string();
                    let row = rows
                        .iter()
                        .find(|(id, _)| *id == chunk_id)
                        .ok_or(RepositoryError::NotFound)?;
                    targets.push(row);
                }
                targets
            }
            None => rows.iter().collect(),
        };

        if let Some((chunk_id, _)) = targets.iter().find(|(_, status)| status == "PROCESSING") {
            return Err(RepositoryError::Conflict(format!(
                "chunk {chunk_id} is being processed and cannot be reprocessed"
            )));
        }

        let now_str = format_datetime(&now);
        for (chunk_id, _) in &targets {
            sqlx::query(
                "UPDATE memory_chunks
                 SET vector_status = 'PENDING', embedding_vector = NULL, attempt_count = 0, next_attempt_at = NULL,
                     failure_code = NULL, failure_reason = NULL, claim_token = NULL, claimed_at = NULL, updated_at = ?
                 WHERE id = ?",
            )
            .bind(&now_str)
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        let (status, _) = rescan(&mut tx, &id, now).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(status)
    }

    async fn reset_ingest(
        &self,
        memory_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProcessingStatus, RepositoryError> {
        let id = memory_id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query("DELETE FROM memory_chunks WHERE memory_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        let result = sqlx::query(
            "UPDATE memories
             SET chunked_at = NULL, ingest_error_code = NULL, ingest_error = NULL, ingest_attempts = 0, next_ingest_at = NULL,
                 processing_status = 'PENDING',
                 chunks_pending = 0, chunks_processing = 0, chunks_generated = 0, chunks_retrying = 0, chunks_failed = 0,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(format_datetime(&now))
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        tx.commit().await.map_err(query_error)?;
        Ok(ProcessingStatus::Pending)
    }

    async fn expire_claims(
        &self,
        max_attempts: u32,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let (requeued, exhausted, affected) =
            expire_in_tx(&mut tx, max_attempts, claimed_before, now).await?;

        let mut reconciled = 0;
        for memory_id in &affected {
            let (_, changed) = rescan(&mut tx, memory_id, now).await?;
            if changed {
                reconciled += 1;
            }
        }

        tx.commit().await.map_err(query_error)?;
        Ok(RecoveryReport {
            requeued,
            exhausted,
            reconciled,
        })
    }

    async fn recover(
        &self,
        max_attempts: u32,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let (requeued, exhausted, _) =
            expire_in_tx(&mut tx, max_attempts, claimed_before, now).await?;

        let memory_ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM memories")
            .fetch_all(&mut *tx)
            .await
            .map_err(query_error)?;

        let mut reconciled = 0;
        for (memory_id,) in &memory_ids {
            let (_, changed) = rescan(&mut tx, memory_id, now).await?;
            if changed {
                reconciled += 1;
            }
        }

        tx.commit().await.map_err(query_error)?;
        Ok(RecoveryReport {
            requeued,
            exhausted,
            reconciled,
        })
    }
}
