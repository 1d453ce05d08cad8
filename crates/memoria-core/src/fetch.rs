//! Content fetcher port.
//!
//! Resolves a memory's `content_ref` to raw bytes. Implementations
//! (filesystem store, HTTP) live in memoria-infra.

use memoria_types::error::PipelineError;

/// Raw content plus the type reported by the store, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait ContentFetcher: Send + Sync {
    /// Fetch the bytes behind `content_ref`.
    ///
    /// Unknown references fail with NOT_FOUND, malformed ones with
    /// INVALID_ARGUMENT, and I/O problems with INTERNAL.
    fn fetch(
        &self,
        content_ref: &str,
    ) -> impl std::future::Future<Output = Result<FetchedContent, PipelineError>> + Send;
}
