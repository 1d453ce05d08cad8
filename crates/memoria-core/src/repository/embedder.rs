//! Embedder repository trait definition.

use memoria_types::embedder::Embedder;
use memoria_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for embedder persistence.
///
/// Implementations encrypt credentials before they reach storage and keep
/// only a fingerprint alongside the embedder row.
pub trait EmbedderRepository: Send + Sync {
    /// Persist a new embedder. Returns the stored embedder, including its
    /// credentials fingerprint.
    ///
    /// Fails with `Conflict` if the name or the
    /// (endpoint_url, api_path, model_identifier) triple is already taken.
    fn create(
        &self,
        embedder: &Embedder,
        credentials: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Embedder, RepositoryError>> + Send;

    fn get_by_id(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Embedder>, RepositoryError>> + Send;

    /// Look up by the unique name a space's `embedding_model` refers to.
    fn get_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Embedder>, RepositoryError>> + Send;

    fn list(&self) -> impl std::future::Future<Output = Result<Vec<Embedder>, RepositoryError>> + Send;
}
