//! Text Embeddings Inference (`/embed`) wire format.

use memoria_types::error::{EmbedError, ErrorCode};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct EmbedRequest<'a> {
    pub inputs: &'a [String],
    /// Truncation is left off so oversize inputs fail instead of being
    /// silently cut.
    pub truncate: bool,
}

/// TEI answers with a bare array of vectors in input order.
pub(crate) fn parse_response(body: &[u8]) -> Result<Vec<Vec<f32>>, EmbedError> {
    serde_json::from_slice(body).map_err(|e| {
        EmbedError::permanent(
            ErrorCode::Internal,
            format!("malformed TEI response: {e}"),
        )
    })
}
