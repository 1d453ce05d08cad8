//! Filesystem content store.
//!
//! Content lives under a root directory and is addressed by a relative key,
//! optionally written as `file://<key>`. Keys may not escape the root.

use std::path::{Component, Path, PathBuf};

use memoria_core::fetch::{ContentFetcher, FetchedContent};
use memoria_types::error::PipelineError;

/// Prefix accepted in front of a relative key.
pub const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a content reference to a path under the root.
    pub fn resolve(&self, content_ref: &str) -> Result<PathBuf, PipelineError> {
        let key = content_ref.strip_prefix(FILE_SCHEME).unwrap_or(content_ref);
        if key.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "empty content reference".to_string(),
            ));
        }
        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(PipelineError::InvalidArgument(format!(
                "content reference '{content_ref}' must be a relative key inside the store"
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Store `bytes` under `key`, creating parent directories. Returns the
    /// content reference for the stored object.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, PipelineError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Internal(format!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::Internal(format!("cannot write {}: {e}", path.display())))?;
        Ok(format!("{FILE_SCHEME}{key}"))
    }
}

impl ContentFetcher for FsContentStore {
    async fn fetch(&self, content_ref: &str) -> Result<FetchedContent, PipelineError> {
        let path = self.resolve(content_ref)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::not_found("content", content_ref));
            }
            Err(e) => {
                return Err(PipelineError::Internal(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(FetchedContent {
            bytes,
            content_type: mime_from_extension(&path).map(str::to_string),
        })
    }
}

/// Best-effort MIME type from a file extension.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_types::error::ErrorCode;

    #[tokio::test]
    async fn test_put_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        let content_ref = store.put("notes/today.md", b"# hello").await.unwrap();
        assert_eq!(content_ref, "file://notes/today.md");

        let fetched = store.fetch(&content_ref).await.unwrap();
        assert_eq!(fetched.bytes, b"# hello");
        assert_eq!(fetched.content_type.as_deref(), Some("text/markdown"));

        let bare = store.fetch("notes/today.md").await.unwrap();
        assert_eq!(bare.bytes, b"# hello");
    }

    #[tokio::test]
    async fn test_missing_content_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let err = store.fetch("nope.txt").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_traversal_rejected() {
        let store = FsContentStore::new("/srv/content");
        for bad in ["../etc/passwd", "a/../../b", "/etc/passwd", "file:///etc/passwd", ""] {
            let err = store.resolve(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArgument, "{bad}");
        }
        assert_eq!(
            store.resolve("file://a/b.txt").unwrap(),
            PathBuf::from("/srv/content/a/b.txt")
        );
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension(Path::new("a.TXT")), Some("text/plain"));
        assert_eq!(mime_from_extension(Path::new("a.png")), Some("image/png"));
        assert_eq!(mime_from_extension(Path::new("a.bin")), None);
        assert_eq!(mime_from_extension(Path::new("noext")), None);
    }
}
