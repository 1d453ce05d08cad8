//! OpenAI-compatible `/v1/embeddings` wire format.
//!
//! Used for both OPENAI and VLLM embedders; vLLM serves the same schema.

use memoria_types::error::{EmbedError, ErrorCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Decode a response body into vectors in input order.
///
/// Entries carry an `index`; providers are allowed to return them out of
/// order.
pub(crate) fn parse_response(body: &[u8]) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut response: EmbeddingResponse = serde_json::from_slice(body).map_err(|e| {
        EmbedError::permanent(
            ErrorCode::Internal,
            format!("malformed embeddings response: {e}"),
        )
    })?;
    if response.data.iter().all(|d| d.index.is_some()) {
        response.data.sort_by_key(|d| d.index);
    }
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}
