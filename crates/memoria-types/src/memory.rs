//! Memory and chunk types for the ingestion pipeline.
//!
//! A memory is one unit of submitted content. It is split into ordered,
//! offset-addressed chunks, and each chunk moves through its own
//! PENDING -> PROCESSING -> {GENERATED, FAILED} lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::attributes::Metadata;
use crate::error::ErrorCode;

/// Memory-level status, derived from chunk statuses and never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "PENDING"),
            ProcessingStatus::Processing => write!(f, "PROCESSING"),
            ProcessingStatus::Completed => write!(f, "COMPLETED"),
            ProcessingStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(format!("invalid processing status: '{other}'")),
        }
    }
}

/// Per-chunk embedding status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VectorStatus {
    Pending,
    Processing,
    Generated,
    Failed,
}

impl fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorStatus::Pending => write!(f, "PENDING"),
            VectorStatus::Processing => write!(f, "PROCESSING"),
            VectorStatus::Generated => write!(f, "GENERATED"),
            VectorStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for VectorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(VectorStatus::Pending),
            "PROCESSING" => Ok(VectorStatus::Processing),
            "GENERATED" => Ok(VectorStatus::Generated),
            "FAILED" => Ok(VectorStatus::Failed),
            other => Err(format!("invalid vector status: '{other}'")),
        }
    }
}

/// Diagnostic attached to a failed chunk or a failed ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
}

impl Failure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Tally bucket a chunk counts toward.
///
/// FAILED splits in two: a chunk with a scheduled retry is still in play,
/// one without is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkBucket {
    Pending,
    Processing,
    Generated,
    Retrying,
    Failed,
}

impl ChunkBucket {
    pub fn of(status: VectorStatus, next_attempt_at: Option<DateTime<Utc>>) -> Self {
        match status {
            VectorStatus::Pending => ChunkBucket::Pending,
            VectorStatus::Processing => ChunkBucket::Processing,
            VectorStatus::Generated => ChunkBucket::Generated,
            VectorStatus::Failed if next_attempt_at.is_some() => ChunkBucket::Retrying,
            VectorStatus::Failed => ChunkBucket::Failed,
        }
    }
}

/// Per-bucket chunk counts maintained alongside each memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTally {
    pub pending: u32,
    pub processing: u32,
    pub generated: u32,
    pub retrying: u32,
    pub failed: u32,
}

impl ChunkTally {
    pub fn total(&self) -> u32 {
        self.pending + self.processing + self.generated + self.retrying + self.failed
    }

    pub fn count(&self, bucket: ChunkBucket) -> u32 {
        match bucket {
            ChunkBucket::Pending => self.pending,
            ChunkBucket::Processing => self.processing,
            ChunkBucket::Generated => self.generated,
            ChunkBucket::Retrying => self.retrying,
            ChunkBucket::Failed => self.failed,
        }
    }

    fn slot(&mut self, bucket: ChunkBucket) -> &mut u32 {
        match bucket {
            ChunkBucket::Pending => &mut self.pending,
            ChunkBucket::Processing => &mut self.processing,
            ChunkBucket::Generated => &mut self.generated,
            ChunkBucket::Retrying => &mut self.retrying,
            ChunkBucket::Failed => &mut self.failed,
        }
    }

    pub fn add(&mut self, bucket: ChunkBucket) {
        *self.slot(bucket) += 1;
    }

    /// Move one chunk between buckets.
    pub fn shift(&mut self, from: ChunkBucket, to: ChunkBucket) {
        let slot = self.slot(from);
        *slot = slot.saturating_sub(1);
        self.add(to);
    }
}

/// Whether a memory's content has been split into chunks yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IngestState {
    NotChunked,
    Chunked { at: DateTime<Utc> },
    Failed { failure: Failure },
}

/// A unit of submitted content within a space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub space_id: Uuid,
    /// Reference resolved by the content fetcher.
    pub content_ref: String,
    /// MIME type as submitted; the fetcher may refine it.
    pub content_type: String,
    pub metadata: Metadata,
    pub processing_status: ProcessingStatus,
    pub ingest: IngestState,
    /// Fetch-and-chunk attempts that failed transiently.
    #[serde(default)]
    pub ingest_attempts: u32,
    /// When a transiently failed ingestion becomes eligible again.
    #[serde(default)]
    pub next_ingest_at: Option<DateTime<Utc>>,
    pub tally: ChunkTally,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

/// Submission accepted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub space_id: Uuid,
    pub content_ref: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_by: Option<String>,
}

/// A contiguous slice of a memory's content, the unit of embedding.
///
/// `embedding_vector` is present exactly when `vector_status` is GENERATED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub id: Uuid,
    pub memory_id: Uuid,
    /// Dense, zero-based position within the memory.
    pub sequence_number: u32,
    pub chunk_text: String,
    pub embedding_vector: Option<Vec<f32>>,
    pub vector_status: VectorStatus,
    /// Byte offset (inclusive) into the original content.
    pub start_offset: u64,
    /// Byte offset (exclusive) into the original content.
    pub end_offset: u64,
    /// Attempts started so far, counted when a worker claims the chunk.
    pub attempt_count: u32,
    /// Earliest time a failed chunk may be claimed again. `None` on a
    /// FAILED chunk means the failure is terminal.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl MemoryChunk {
    pub fn bucket(&self) -> ChunkBucket {
        ChunkBucket::of(self.vector_status, self.next_attempt_at)
    }

    pub fn is_terminal_failure(&self) -> bool {
        self.bucket() == ChunkBucket::Failed
    }
}

/// Chunk row produced by ingestion, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub sequence_number: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    pub chunk_text: String,
    /// Set when the chunk is born terminally FAILED (cannot fit the
    /// embedder's input limit).
    pub failure: Option<Failure>,
}

/// Per-chunk detail returned by a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatusView {
    pub chunk_id: Uuid,
    pub sequence_number: u32,
    pub vector_status: VectorStatus,
    pub start_offset: u64,
    pub end_offset: u64,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// True when the chunk failed and will not be retried without reprocess.
    pub terminal: bool,
    pub failure: Option<Failure>,
}

impl From<&MemoryChunk> for ChunkStatusView {
    fn from(chunk: &MemoryChunk) -> Self {
        Self {
            chunk_id: chunk.id,
            sequence_number: chunk.sequence_number,
            vector_status: chunk.vector_status,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            attempt_count: chunk.attempt_count,
            next_attempt_at: chunk.next_attempt_at,
            terminal: chunk.is_terminal_failure(),
            failure: chunk.failure.clone(),
        }
    }
}

/// Answer to `get_status`: the aggregate plus per-chunk detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatusReport {
    pub memory_id: Uuid,
    pub space_id: Uuid,
    pub processing_status: ProcessingStatus,
    pub ingest: IngestState,
    pub ingest_attempts: u32,
    pub next_ingest_at: Option<DateTime<Utc>>,
    pub tally: ChunkTally,
    pub chunks: Vec<ChunkStatusView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_display() {
        assert_eq!(
            "completed".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Completed
        );
        assert_eq!(VectorStatus::Generated.to_string(), "GENERATED");
        assert!("done".parse::<VectorStatus>().is_err());
    }

    #[test]
    fn test_bucket_splits_failed() {
        assert_eq!(
            ChunkBucket::of(VectorStatus::Failed, Some(Utc::now())),
            ChunkBucket::Retrying
        );
        assert_eq!(ChunkBucket::of(VectorStatus::Failed, None), ChunkBucket::Failed);
        assert_eq!(
            ChunkBucket::of(VectorStatus::Pending, None),
            ChunkBucket::Pending
        );
    }

    #[test]
    fn test_tally_shift() {
        let mut tally = ChunkTally::default();
        tally.add(ChunkBucket::Pending);
        tally.add(ChunkBucket::Pending);
        tally.shift(ChunkBucket::Pending, ChunkBucket::Processing);
        assert_eq!(tally.pending, 1);
        assert_eq!(tally.processing, 1);
        tally.shift(ChunkBucket::Processing, ChunkBucket::Generated);
        assert_eq!(tally.count(ChunkBucket::Generated), 1);
        assert_eq!(tally.total(), 2);
    }

    #[test]
    fn test_ingest_state_serde() {
        let json = serde_json::to_string(&IngestState::NotChunked).unwrap();
        assert_eq!(json, r#"{"state":"not_chunked"}"#);
        let failed = IngestState::Failed {
            failure: Failure::new(ErrorCode::InvalidArgument, "binary content"),
        };
        let back: IngestState = serde_json::from_str(&serde_json::to_string(&failed).unwrap()).unwrap();
        assert_eq!(back, failed);
    }
}
