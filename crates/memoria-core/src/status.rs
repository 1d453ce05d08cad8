//! Status aggregation.
//!
//! A memory's processing status is never stored independently of its
//! chunks: it is recomputed from the per-bucket chunk tallies (kept up to
//! date in the same transaction as every chunk transition) and the
//! memory's ingestion state.

use memoria_types::memory::{ChunkBucket, ChunkTally, IngestState, MemoryChunk, ProcessingStatus};

/// Derive a memory's status.
///
/// - PENDING before chunking has run.
/// - FAILED if ingestion failed or any chunk failed terminally.
/// - COMPLETED if every chunk is GENERATED, or there are no chunks at all.
/// - PROCESSING otherwise.
pub fn derive_status(ingest: &IngestState, tally: &ChunkTally) -> ProcessingStatus {
    match ingest {
        IngestState::NotChunked => ProcessingStatus::Pending,
        IngestState::Failed { .. } => ProcessingStatus::Failed,
        IngestState::Chunked { .. } => {
            if tally.failed > 0 {
                ProcessingStatus::Failed
            } else if tally.generated == tally.total() {
                ProcessingStatus::Completed
            } else {
                ProcessingStatus::Processing
            }
        }
    }
}

/// Rebuild a tally from chunk rows. Used for full rescans after a restart.
pub fn tally_chunks<'a>(chunks: impl IntoIterator<Item = &'a MemoryChunk>) -> ChunkTally {
    let mut tally = ChunkTally::default();
    for chunk in chunks {
        tally.add(chunk.bucket());
    }
    tally
}

/// Apply one chunk transition to a tally and return the new memory status.
pub fn apply_transition(
    ingest: &IngestState,
    tally: &mut ChunkTally,
    from: ChunkBucket,
    to: ChunkBucket,
) -> ProcessingStatus {
    if from != to {
        tally.shift(from, to);
    }
    derive_status(ingest, tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memoria_types::error::ErrorCode;
    use memoria_types::memory::{Failure, VectorStatus};
    use uuid::Uuid;

    fn chunked() -> IngestState {
        IngestState::Chunked { at: Utc::now() }
    }

    fn tally(pending: u32, processing: u32, generated: u32, retrying: u32, failed: u32) -> ChunkTally {
        ChunkTally {
            pending,
            processing,
            generated,
            retrying,
            failed,
        }
    }

    #[test]
    fn test_not_chunked_is_pending() {
        assert_eq!(
            derive_status(&IngestState::NotChunked, &ChunkTally::default()),
            ProcessingStatus::Pending
        );
    }

    #[test]
    fn test_zero_chunks_is_completed() {
        assert_eq!(
            derive_status(&chunked(), &ChunkTally::default()),
            ProcessingStatus::Completed
        );
    }

    #[test]
    fn test_all_generated_is_completed() {
        assert_eq!(
            derive_status(&chunked(), &tally(0, 0, 6, 0, 0)),
            ProcessingStatus::Completed
        );
    }

    #[test]
    fn test_retrying_chunk_keeps_memory_processing() {
        assert_eq!(
            derive_status(&chunked(), &tally(0, 0, 5, 1, 0)),
            ProcessingStatus::Processing
        );
    }

    #[test]
    fn test_terminal_failure_wins() {
        assert_eq!(
            derive_status(&chunked(), &tally(2, 1, 2, 0, 1)),
            ProcessingStatus::Failed
        );
        let failed = IngestState::Failed {
            failure: Failure::new(ErrorCode::InvalidArgument, "binary"),
        };
        assert_eq!(
            derive_status(&failed, &ChunkTally::default()),
            ProcessingStatus::Failed
        );
    }

    #[test]
    fn test_incremental_matches_rescan() {
        let now = Utc::now();
        let mut chunks: Vec<MemoryChunk> = (0..3)
            .map(|i| MemoryChunk {
                id: Uuid::now_v7(),
                memory_id: Uuid::nil(),
                sequence_number: i,
                chunk_text: format!("chunk {i}"),
                embedding_vector: None,
                vector_status: VectorStatus::Pending,
                start_offset: 0,
                end_offset: 1,
                attempt_count: 0,
                next_attempt_at: None,
                failure: None,
                created_at: now,
                updated_at: now,
                created_by: None,
                updated_by: None,
            })
            .collect();
        let ingest = chunked();
        let mut incremental = tally_chunks(&chunks);

        let before = chunks[0].bucket();
        chunks[0].vector_status = VectorStatus::Processing;
        apply_transition(&ingest, &mut incremental, before, chunks[0].bucket());

        let before = chunks[0].bucket();
        chunks[0].vector_status = VectorStatus::Generated;
        chunks[0].embedding_vector = Some(vec![0.0; 4]);
        let status = apply_transition(&ingest, &mut incremental, before, chunks[0].bucket());

        assert_eq!(status, ProcessingStatus::Processing);
        assert_eq!(incremental, tally_chunks(&chunks));
    }
}
