//! HTTP(S) content fetcher.

use std::time::Duration;

use memoria_core::fetch::{ContentFetcher, FetchedContent};
use memoria_types::error::PipelineError;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

/// Fetches `http://` and `https://` content references with a GET.
///
/// Bodies larger than `max_bytes` are rejected, by `Content-Length` when the
/// server sends one and while streaming otherwise.
#[derive(Clone)]
pub struct HttpContentFetcher {
    http: reqwest::Client,
    max_bytes: u64,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("memoria/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, max_bytes })
    }

    fn too_large(&self, content_ref: &str) -> PipelineError {
        PipelineError::InvalidArgument(format!(
            "content at {content_ref} exceeds the {} byte limit",
            self.max_bytes
        ))
    }
}

impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, content_ref: &str) -> Result<FetchedContent, PipelineError> {
        let mut response = self.http.get(content_ref).send().await.map_err(|e| {
            if e.is_builder() {
                PipelineError::InvalidArgument(format!("invalid content URL '{content_ref}': {e}"))
            } else if e.is_timeout() {
                PipelineError::DeadlineExceeded(format!("fetching {content_ref} timed out"))
            } else {
                PipelineError::Internal(format!("fetching {content_ref} failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(PipelineError::not_found("content", content_ref));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::ResourceExhausted(format!(
                "fetching {content_ref} was rate limited"
            )));
        }
        if status.is_client_error() {
            return Err(PipelineError::InvalidArgument(format!(
                "fetching {content_ref} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::Internal(format!(
                "fetching {content_ref} returned {status}"
            )));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(self.too_large(content_ref));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::DeadlineExceeded(format!("reading {content_ref} timed out"))
            } else {
                PipelineError::Internal(format!("reading {content_ref} failed: {e}"))
            }
        })? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(content_ref));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedContent {
            bytes,
            content_type,
        })
    }
}
