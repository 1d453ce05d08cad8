//! Embedder registry.
//!
//! Resolves a space's `embedding_model` to a validated [`Embedder`].
//! Embedders are immutable once registered, so resolved definitions are
//! cached for the life of the registry.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use memoria_types::embedder::{Embedder, Modality, NewEmbedder};
use memoria_types::error::{PipelineError, RepositoryError};
use uuid::Uuid;

use crate::repository::embedder::EmbedderRepository;

/// Check that an embedder can serve text chunks.
pub fn validate_for_text(embedder: &Embedder) -> Result<(), PipelineError> {
    if embedder.dimensionality == 0 {
        return Err(PipelineError::InvalidArgument(format!(
            "embedder '{}' has no dimensionality",
            embedder.name
        )));
    }
    if embedder.model_identifier.is_empty() || embedder.endpoint_url.is_empty() {
        return Err(PipelineError::InvalidArgument(format!(
            "embedder '{}' has no model or endpoint",
            embedder.name
        )));
    }
    if !embedder.supports(Modality::Text) {
        return Err(PipelineError::InvalidArgument(format!(
            "embedder '{}' does not support the TEXT modality",
            embedder.name
        )));
    }
    Ok(())
}

pub struct EmbedderRegistry<R: EmbedderRepository> {
    repo: R,
    cache: Arc<DashMap<String, Embedder>>,
}

impl<R: EmbedderRepository> EmbedderRegistry<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Resolve an embedding model name. Fails with NOT_FOUND for unknown
    /// names and INVALID_ARGUMENT for embedders that cannot embed text.
    pub async fn lookup(&self, embedding_model: &str) -> Result<Embedder, PipelineError> {
        if let Some(hit) = self.cache.get(embedding_model) {
            return Ok(hit.value().clone());
        }

        let embedder = self
            .repo
            .get_by_name(embedding_model)
            .await?
            .ok_or_else(|| PipelineError::not_found("embedder", embedding_model))?;
        validate_for_text(&embedder)?;

        self.cache
            .insert(embedding_model.to_string(), embedder.clone());
        Ok(embedder)
    }

    /// Register a new embedder. Credentials are handed to the repository,
    /// which stores them encrypted.
    pub async fn register(
        &self,
        request: NewEmbedder,
        credentials: Option<&str>,
        created_by: Option<String>,
    ) -> Result<Embedder, PipelineError> {
        request.validate().map_err(PipelineError::InvalidArgument)?;

        let now = Utc::now();
        let embedder = Embedder {
            id: Uuid::now_v7(),
            name: request.name.trim().to_string(),
            provider_type: request.provider_type,
            endpoint_url: request.endpoint_url.trim_end_matches('/').to_string(),
            api_path: request.resolved_api_path(),
            model_identifier: request.model_identifier.clone(),
            dimensionality: request.dimensionality,
            max_sequence_length: request.max_sequence_length,
            supported_modalities: request.supported_modalities.clone(),
            labels: request.labels.clone(),
            max_batch_size: request.max_batch_size,
            max_concurrency: request.max_concurrency,
            request_timeout_ms: request.request_timeout_ms,
            credentials_fingerprint: None,
            owner: request.owner.clone(),
            created_at: now,
            updated_at: now,
            created_by: created_by.clone(),
            updated_by: created_by,
        };

        let credentials = credentials.filter(|c| !c.is_empty());
        self.repo
            .create(&embedder, credentials)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(msg) => PipelineError::InvalidArgument(msg),
                other => PipelineError::Internal(other.to_string()),
            })
    }

    pub async fn list(&self) -> Result<Vec<Embedder>, PipelineError> {
        Ok(self.repo.list().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use memoria_types::attributes::Labels;
    use memoria_types::embedder::ProviderType;
    use memoria_types::error::ErrorCode;

    #[derive(Default)]
    struct InMemoryEmbedders {
        rows: Mutex<Vec<Embedder>>,
        lookups: Mutex<u32>,
    }

    impl EmbedderRepository for InMemoryEmbedders {
        async fn create(
            &self,
            embedder: &Embedder,
            credentials: Option<&str>,
        ) -> Result<Embedder, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|e| e.name == embedder.name) {
                return Err(RepositoryError::Conflict(format!(
                    "embedder '{}' already exists",
                    embedder.name
                )));
            }
            let mut stored = embedder.clone();
            stored.credentials_fingerprint = credentials.map(|_| "abcd1234".to_string());
            rows.push(stored.clone());
            Ok(stored)
        }

        async fn get_by_id(&self, id: &Uuid) -> Result<Option<Embedder>, RepositoryError> {
            Ok(self.rows.lock().unwrap().iter().find(|e| e.id == *id).cloned())
        }

        async fn get_by_name(&self, name: &str) -> Result<Option<Embedder>, RepositoryError> {
            *self.lookups.lock().unwrap() += 1;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.name == name)
                .cloned())
        }

        async fn list(&self) -> Result<Vec<Embedder>, RepositoryError> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn request(name: &str) -> NewEmbedder {
        NewEmbedder {
            name: name.to_string(),
            provider_type: ProviderType::OpenAi,
            endpoint_url: "https://api.openai.com/".to_string(),
            api_path: None,
            model_identifier: "text-embedding-3-small".to_string(),
            dimensionality: 1536,
            max_sequence_length: None,
            supported_modalities: BTreeSet::from([Modality::Text]),
            labels: Labels::new(),
            max_batch_size: None,
            max_concurrency: None,
            request_timeout_ms: None,
            owner: None,
        }
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let registry = EmbedderRegistry::new(InMemoryEmbedders::default());
        let created = registry
            .register(request("small"), Some("sk-test"), None)
            .await
            .unwrap();
        assert_eq!(created.api_path, "/v1/embeddings");
        assert_eq!(created.endpoint_url, "https://api.openai.com");
        assert!(created.credentials_fingerprint.is_some());

        let found = registry.lookup("small").await.unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_not_found() {
        let registry = EmbedderRegistry::new(InMemoryEmbedders::default());
        let err = registry.lookup("missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_lookup_is_cached() {
        let repo = InMemoryEmbedders::default();
        let registry = EmbedderRegistry::new(repo);
        registry.register(request("cached"), None, None).await.unwrap();
        registry.lookup("cached").await.unwrap();
        registry.lookup("cached").await.unwrap();
        assert_eq!(*registry.repo.lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_invalid_argument() {
        let registry = EmbedderRegistry::new(InMemoryEmbedders::default());
        registry.register(request("dup"), None, None).await.unwrap();
        let err = registry.register(request("dup"), None, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_request() {
        let registry = EmbedderRegistry::new(InMemoryEmbedders::default());
        let mut bad = request("bad");
        bad.dimensionality = 0;
        let err = registry.register(bad, None, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_image_only_embedder_rejected_on_lookup() {
        let repo = InMemoryEmbedders::default();
        let mut stored = EmbedderRegistry::new(InMemoryEmbedders::default())
            .register(request("img"), None, None)
            .await
            .unwrap();
        stored.supported_modalities = BTreeSet::from([Modality::Image]);
        repo.rows.lock().unwrap().push(stored);

        let registry = EmbedderRegistry::new(repo);
        let err = registry.lookup("img").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
