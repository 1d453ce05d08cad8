//! HTTP embedding providers.
//!
//! [`HttpEmbeddingClient`] is the `EmbeddingBackend` used in production. It
//! speaks the OpenAI-compatible schema for OPENAI and VLLM embedders and the
//! TEI schema for TEI embedders, and turns every transport or HTTP failure
//! into a classified [`EmbedError`]:
//!
//! | Condition                     | Kind      | Code               |
//! |-------------------------------|-----------|--------------------|
//! | 429                           | transient | RESOURCE_EXHAUSTED |
//! | 5xx, connection failure       | transient | INTERNAL           |
//! | request timeout               | transient | DEADLINE_EXCEEDED  |
//! | 404                           | permanent | NOT_FOUND          |
//! | other 4xx                     | permanent | INVALID_ARGUMENT   |
//! | unparseable body              | permanent | INTERNAL           |

pub mod openai;
pub mod tei;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use memoria_core::embedding::EmbeddingBackend;
use memoria_types::embedder::{Embedder, ProviderType};
use memoria_types::error::{EmbedError, ErrorCode, RepositoryError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::sqlite::embedder::SqliteEmbedderRepository;

/// Where the client looks up an embedder's decrypted credential.
pub trait CredentialSource: Send + Sync {
    fn credentials(
        &self,
        embedder_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<SecretString>, RepositoryError>> + Send;
}

impl CredentialSource for SqliteEmbedderRepository {
    async fn credentials(&self, embedder_id: &Uuid) -> Result<Option<SecretString>, RepositoryError> {
        self.load_credentials(embedder_id).await
    }
}

/// For endpoints that need no authentication (local TEI, vLLM).
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    async fn credentials(&self, _embedder_id: &Uuid) -> Result<Option<SecretString>, RepositoryError> {
        Ok(None)
    }
}

/// reqwest-based embedding backend.
///
/// Credentials are sent as a bearer token and are never logged. They are
/// cached per embedder after the first call; embedders are immutable once
/// registered.
pub struct HttpEmbeddingClient<C: CredentialSource> {
    http: reqwest::Client,
    credentials: C,
    secrets: DashMap<Uuid, Option<Arc<SecretString>>>,
}

impl<C: CredentialSource> HttpEmbeddingClient<C> {
    pub fn new(credentials: C) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("memoria/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            credentials,
            secrets: DashMap::new(),
        })
    }

    async fn secret_for(&self, embedder: &Embedder) -> Result<Option<Arc<SecretString>>, EmbedError> {
        if let Some(cached) = self.secrets.get(&embedder.id) {
            return Ok(cached.clone());
        }
        if embedder.credentials_fingerprint.is_none() {
            return Ok(None);
        }
        let secret = self
            .credentials
            .credentials(&embedder.id)
            .await
            .map_err(|e| {
                EmbedError::transient(
                    ErrorCode::Internal,
                    format!("credentials for embedder '{}' unavailable: {e}", embedder.name),
                )
            })?
            .map(Arc::new);
        self.secrets.insert(embedder.id, secret.clone());
        Ok(secret)
    }
}

impl<C: CredentialSource> EmbeddingBackend for HttpEmbeddingClient<C> {
    async fn embed_batch(&self, embedder: &Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let secret = self.secret_for(embedder).await?;
        let url = embedder.request_url();

        let mut request = self.http.post(&url);
        request = match embedder.provider_type {
            ProviderType::OpenAi | ProviderType::Vllm => request.json(&openai::EmbeddingRequest {
                model: &embedder.model_identifier,
                input: texts,
            }),
            ProviderType::Tei => request.json(&tei::EmbedRequest {
                inputs: texts,
                truncate: false,
            }),
        };
        if let Some(secret) = &secret {
            request = request.bearer_auth(secret.expose_secret());
        }
        if let Some(ms) = embedder.request_timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }

        tracing::debug!(
            embedder = %embedder.name,
            provider = %embedder.provider_type,
            batch = texts.len(),
            "embedding request"
        );

        let response = request.send().await.map_err(|e| transport_error(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = parse_retry_after(response.headers(), Utc::now());
            let body = response.text().await.unwrap_or_default();
            let error = EmbedError::from_http_status(status.as_u16(), &body, retry_after_ms);
            tracing::warn!(
                embedder = %embedder.name,
                status = status.as_u16(),
                transient = error.is_transient(),
                "embedding provider returned an error"
            );
            return Err(error);
        }

        let body = response.bytes().await.map_err(|e| transport_error(&url, e))?;
        match embedder.provider_type {
            ProviderType::OpenAi | ProviderType::Vllm => openai::parse_response(&body),
            ProviderType::Tei => tei::parse_response(&body),
        }
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> EmbedError {
    if e.is_timeout() {
        EmbedError::timeout(format!("request to {url} timed out"))
    } else if e.is_decode() {
        EmbedError::permanent(ErrorCode::Internal, format!("unreadable response from {url}: {e}"))
    } else {
        EmbedError::transient(ErrorCode::Internal, format!("request to {url} failed: {e}"))
    }
}

/// Read a `Retry-After` header as milliseconds from `now`.
///
/// Accepts both delta-seconds and an HTTP date.
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).num_milliseconds().max(0) as u64)
}
