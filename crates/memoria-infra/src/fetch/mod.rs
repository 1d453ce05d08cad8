//! Content fetchers: resolve a memory's `content_ref` to bytes.

pub mod fs;
pub mod http;
pub mod routing;

pub use fs::FsContentStore;
pub use http::HttpContentFetcher;
pub use routing::RoutingFetcher;
