//! SQLite embedder repository implementation.
//!
//! Implements `EmbedderRepository` from `memoria-core`. Credentials are
//! encrypted with the vault before they are written and only their
//! fingerprint is ever returned with an embedder.

use std::collections::BTreeSet;
use std::sync::Arc;

use memoria_core::repository::embedder::EmbedderRepository;
use memoria_types::attributes::Labels;
use memoria_types::embedder::{Embedder, Modality, ProviderType};
use memoria_types::error::RepositoryError;
use secrecy::SecretString;
use sqlx::Row;
use uuid::Uuid;

use super::pool::{DatabasePool, format_datetime, is_unique_violation, parse_datetime, query_error};
use crate::crypto::hash::credential_fingerprint;
use crate::crypto::vault::VaultCrypto;

/// SQLite-backed implementation of `EmbedderRepository`.
#[derive(Clone)]
pub struct SqliteEmbedderRepository {
    pool: DatabasePool,
    vault: Arc<VaultCrypto>,
}

impl SqliteEmbedderRepository {
    pub fn new(pool: DatabasePool, vault: Arc<VaultCrypto>) -> Self {
        Self { pool, vault }
    }

    /// Decrypt the stored credential for an embedder, if it has one.
    pub async fn load_credentials(&self, id: &Uuid) -> Result<Option<SecretString>, RepositoryError> {
        let row = sqlx::query("SELECT credentials_ciphertext FROM embedders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?
            .ok_or(RepositoryError::NotFound)?;

        let ciphertext: Option<Vec<u8>> =
            row.try_get("credentials_ciphertext").map_err(query_error)?;
        ciphertext
            .map(|data| {
                self.vault
                    .decrypt_string(&data)
                    .map(SecretString::from)
                    .map_err(|e| RepositoryError::Query(format!("credentials unreadable: {e}")))
            })
            .transpose()
    }
}

/// Internal row type for mapping SQLite rows to domain Embedder.
struct EmbedderRow {
    id: String,
    name: String,
    provider_type: String,
    endpoint_url: String,
    api_path: String,
    model_identifier: String,
    dimensionality: i64,
    max_sequence_length: Option<i64>,
    supported_modalities: String,
    labels: String,
    max_batch_size: Option<i64>,
    max_concurrency: Option<i64>,
    request_timeout_ms: Option<i64>,
    credentials_fingerprint: Option<String>,
    owner: Option<String>,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    updated_by: Option<String>,
}

impl EmbedderRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            provider_type: row.try_get("provider_type")?,
            endpoint_url: row.try_get("endpoint_url")?,
            api_path: row.try_get("api_path")?,
            model_identifier: row.try_get("model_identifier")?,
            dimensionality: row.try_get("dimensionality")?,
            max_sequence_length: row.try_get("max_sequence_length")?,
            supported_modalities: row.try_get("supported_modalities")?,
            labels: row.try_get("labels")?,
            max_batch_size: row.try_get("max_batch_size")?,
            max_concurrency: row.try_get("max_concurrency")?,
            request_timeout_ms: row.try_get("request_timeout_ms")?,
            credentials_fingerprint: row.try_get("credentials_fingerprint")?,
            owner: row.try_get("owner")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
        })
    }

    fn into_embedder(self) -> Result<Embedder, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid embedder id: {e}")))?;
        let provider_type: ProviderType = self
            .provider_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let supported_modalities: BTreeSet<Modality> =
            serde_json::from_str(&self.supported_modalities)
                .map_err(|e| RepositoryError::Query(format!("invalid modalities JSON: {e}")))?;
        let labels: Labels = serde_json::from_str(&self.labels)
            .map_err(|e| RepositoryError::Query(format!("invalid labels JSON: {e}")))?;

        Ok(Embedder {
            id,
            name: self.name,
            provider_type,
            endpoint_url: self.endpoint_url,
            api_path: self.api_path,
            model_identifier: self.model_identifier,
            dimensionality: to_u32(self.dimensionality, "dimensionality")?,
            max_sequence_length: self
                .max_sequence_length
                .map(|v| to_u32(v, "max_sequence_length"))
                .transpose()?,
            supported_modalities,
            labels,
            max_batch_size: self
                .max_batch_size
                .map(|v| to_u32(v, "max_batch_size"))
                .transpose()?,
            max_concurrency: self
                .max_concurrency
                .map(|v| to_u32(v, "max_concurrency"))
                .transpose()?,
            request_timeout_ms: self.request_timeout_ms.map(|v| v.max(0) as u64),
            credentials_fingerprint: self.credentials_fingerprint,
            owner: self.owner,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

fn to_u32(value: i64, field: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Query(format!("{field} out of range: {value}")))
}

impl EmbedderRepository for SqliteEmbedderRepository {
    async fn create(
        &self,
        embedder: &Embedder,
        credentials: Option<&str>,
    ) -> Result<Embedder, RepositoryError> {
        let modalities = serde_json::to_string(&embedder.supported_modalities)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let labels = serde_json::to_string(&embedder.labels)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let ciphertext = credentials
            .map(|c| self.vault.encrypt(c.as_bytes()))
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("credential encryption failed: {e}")))?;
        let fingerprint = credentials.map(credential_fingerprint);

        let result = sqlx::query(
            "INSERT INTO embedders (id, name, provider_type, endpoint_url, api_path, model_identifier, dimensionality, max_sequence_length, supported_modalities, labels, max_batch_size, max_concurrency, request_timeout_ms, credentials_ciphertext, credentials_fingerprint, owner, created_at, updated_at, created_by, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(embedder.id.to_string())
        .bind(&embedder.name)
        .bind(embedder.provider_type.to_string())
        .bind(&embedder.endpoint_url)
        .bind(&embedder.api_path)
        .bind(&embedder.model_identifier)
        .bind(i64::from(embedder.dimensionality))
        .bind(embedder.max_sequence_length.map(i64::from))
        .bind(&modalities)
        .bind(&labels)
        .bind(embedder.max_batch_size.map(i64::from))
        .bind(embedder.max_concurrency.map(i64::from))
        .bind(embedder.request_timeout_ms.map(|v| v as i64))
        .bind(ciphertext)
        .bind(&fingerprint)
        .bind(&embedder.owner)
        .bind(format_datetime(&embedder.created_at))
        .bind(format_datetime(&embedder.updated_at))
        .bind(&embedder.created_by)
        .bind(&embedder.updated_by)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => {
                let mut stored = embedder.clone();
                stored.credentials_fingerprint = fingerprint;
                Ok(stored)
            }
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "an embedder named '{}' or serving {}{} with model '{}' already exists",
                embedder.name, embedder.endpoint_url, embedder.api_path, embedder.model_identifier
            ))),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<Embedder>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM embedders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| EmbedderRow::from_row(&row).map_err(query_error)?.into_embedder())
            .transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Embedder>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM embedders WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| EmbedderRow::from_row(&row).map_err(query_error)?.into_embedder())
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Embedder>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM embedders ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut embedders = Vec::with_capacity(rows.len());
        for row in &rows {
            embedders.push(EmbedderRow::from_row(row).map_err(query_error)?.into_embedder()?);
        }
        Ok(embedders)
    }
}
