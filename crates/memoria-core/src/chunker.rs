//! Deterministic, offset-addressed chunking.
//!
//! Content is split into windows of at most `max_chunk_size` bytes, each
//! starting `overlap_size` bytes before the previous window ended. Offsets
//! are byte offsets into the original content, snapped down to UTF-8
//! character boundaries so every chunk is valid text.
//!
//! When the target embedder declares a maximum input length, windows longer
//! than that limit are split again into contiguous, non-overlapping pieces.
//! Nothing is ever truncated: a piece that still cannot fit (a single
//! character wider than the limit) is emitted as a FAILED chunk.

use std::ops::Range;

use memoria_types::config::ChunkingConfig;
use memoria_types::embedder::Modality;
use memoria_types::error::{ErrorCode, PipelineError};
use memoria_types::memory::{Failure, NewChunk};

/// Modality a content type routes to, or `None` for opaque binary data.
pub fn modality_for(content_type: &str) -> Option<Modality> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    match kind {
        "text" => Some(Modality::Text),
        "image" => Some(Modality::Image),
        "audio" => Some(Modality::Audio),
        "video" => Some(Modality::Video),
        "application" => {
            let text_like = matches!(
                subtype,
                "json"
                    | "xml"
                    | "x-yaml"
                    | "yaml"
                    | "toml"
                    | "x-toml"
                    | "javascript"
                    | "x-ndjson"
                    | "markdown"
            ) || subtype.ends_with("+json")
                || subtype.ends_with("+xml");
            text_like.then_some(Modality::Text)
        }
        _ => None,
    }
}

/// Splits content into chunk records for one memory.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
    /// Embedder input limit in bytes.
    max_input_len: Option<usize>,
}

impl Chunker {
    /// Build a chunker, rejecting invalid configurations up front.
    pub fn new(config: ChunkingConfig, max_input_len: Option<u32>) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::InvalidArgument)?;
        Ok(Self {
            config,
            max_input_len: max_input_len.map(|n| n as usize),
        })
    }

    /// Route by content type, decode, and chunk raw content.
    pub fn chunk(&self, content: &[u8], content_type: &str) -> Result<Vec<NewChunk>, PipelineError> {
        match modality_for(content_type) {
            Some(Modality::Text) => {}
            Some(other) => {
                return Err(PipelineError::InvalidArgument(format!(
                    "{other} content ('{content_type}') is not supported for chunking"
                )));
            }
            None => {
                return Err(PipelineError::InvalidArgument(format!(
                    "content type '{content_type}' is not a text format"
                )));
            }
        }
        let text = std::str::from_utf8(content).map_err(|e| {
            PipelineError::InvalidArgument(format!("content is not valid UTF-8: {e}"))
        })?;
        Ok(self.chunk_text(text))
    }

    /// Chunk already-decoded text.
    ///
    /// Windows advance by `max_chunk_size - overlap_size`; the next window
    /// always starts after the previous chunk's start, so offsets stay
    /// strictly increasing even when a window was split for the embedder.
    pub fn chunk_text(&self, text: &str) -> Vec<NewChunk> {
        let len = text.len();
        let max = self.config.max_chunk_size as usize;
        let overlap = self.config.overlap_size as usize;
        let mut chunks = Vec::new();
        if len == 0 {
            return chunks;
        }

        let mut start = 0;
        loop {
            let mut end = floor_boundary(text, (start + max).min(len));
            if end <= start {
                // A single character wider than the window.
                end = ceil_boundary(text, start + 1);
            }

            let last_start = match self.max_input_len {
                Some(limit) if end - start > limit => {
                    let mut last = start;
                    for piece in split_to_limit(text, start..end, limit) {
                        last = piece.start;
                        push_chunk(&mut chunks, text, piece, limit);
                    }
                    last
                }
                _ => {
                    push_chunk(&mut chunks, text, start..end, usize::MAX);
                    start
                }
            };

            if end >= len {
                break;
            }
            let mut next = floor_boundary(text, end.saturating_sub(overlap));
            if next <= last_start {
                next = end;
            }
            start = next;
        }
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<NewChunk>, text: &str, span: Range<usize>, limit: usize) {
    let failure = (span.len() > limit).then(|| {
        Failure::new(
            ErrorCode::InvalidArgument,
            format!(
                "chunk of {} bytes cannot be split below the embedder input limit of {limit} bytes",
                span.len()
            ),
        )
    });
    chunks.push(NewChunk {
        sequence_number: chunks.len() as u32,
        start_offset: span.start as u64,
        end_offset: span.end as u64,
        chunk_text: text[span].to_string(),
        failure,
    });
}

/// Contiguous, non-overlapping pieces of `span`, each at most `limit` bytes
/// unless a single character is wider than `limit`.
fn split_to_limit(text: &str, span: Range<usize>, limit: usize) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = span.start;
    while start < span.end {
        let mut end = floor_boundary(text, (start + limit).min(span.end));
        if end <= start {
            end = ceil_boundary(text, start + 1).min(span.end);
        }
        pieces.push(start..end);
        start = end;
    }
    pieces
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
