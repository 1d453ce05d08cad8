//! Space repository trait definition.

use memoria_types::error::RepositoryError;
use memoria_types::space::Space;
use uuid::Uuid;

/// Repository trait for space persistence.
pub trait SpaceRepository: Send + Sync {
    /// Create a new space. Fails with `Conflict` on a duplicate name.
    fn create(
        &self,
        space: &Space,
    ) -> impl std::future::Future<Output = Result<Space, RepositoryError>> + Send;

    fn get_by_id(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Space>, RepositoryError>> + Send;

    fn get_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Space>, RepositoryError>> + Send;

    fn list(&self) -> impl std::future::Future<Output = Result<Vec<Space>, RepositoryError>> + Send;
}
