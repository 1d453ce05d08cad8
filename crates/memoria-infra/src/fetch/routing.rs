//! Dispatch content references to a fetcher by scheme.

use memoria_core::fetch::{ContentFetcher, FetchedContent};
use memoria_types::error::PipelineError;

use super::fs::{FILE_SCHEME, FsContentStore};
use super::http::HttpContentFetcher;

/// `http://` and `https://` go to the HTTP fetcher; `file://` and bare keys
/// go to the filesystem store. Any other scheme is rejected.
#[derive(Clone)]
pub struct RoutingFetcher {
    store: FsContentStore,
    http: HttpContentFetcher,
}

enum Route {
    Store,
    Http,
}

impl RoutingFetcher {
    pub fn new(store: FsContentStore, http: HttpContentFetcher) -> Self {
        Self { store, http }
    }

    pub fn store(&self) -> &FsContentStore {
        &self.store
    }

    fn route(content_ref: &str) -> Result<Route, PipelineError> {
        if content_ref.starts_with("http://") || content_ref.starts_with("https://") {
            return Ok(Route::Http);
        }
        if content_ref.starts_with(FILE_SCHEME) {
            return Ok(Route::Store);
        }
        match content_ref.split_once("://") {
            Some((scheme, _)) => Err(PipelineError::InvalidArgument(format!(
                "unsupported content scheme '{scheme}'"
            ))),
            None => Ok(Route::Store),
        }
    }
}

impl ContentFetcher for RoutingFetcher {
    async fn fetch(&self, content_ref: &str) -> Result<FetchedContent, PipelineError> {
        match Self::route(content_ref)? {
            Route::Store => self.store.fetch(content_ref).await,
            Route::Http => self.http.fetch(content_ref).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use memoria_types::error::ErrorCode;

    fn fetcher(root: &std::path::Path) -> RoutingFetcher {
        RoutingFetcher::new(
            FsContentStore::new(root),
            HttpContentFetcher::new(Duration::from_secs(1), 1024).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_file_refs_use_store() {
        let dir = tempfile::tempdir().unwrap();
        let routing = fetcher(dir.path());
        let content_ref = routing.store().put("a.txt", b"local").await.unwrap();
        assert_eq!(routing.fetch(&content_ref).await.unwrap().bytes, b"local");
        assert_eq!(routing.fetch("a.txt").await.unwrap().bytes, b"local");
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher(dir.path()).fetch("s3://bucket/key").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
