//! Embedder definitions: the external vector-generation endpoints a space
//! embeds its chunks with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::attributes::Labels;

/// The closed set of provider wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderType {
    /// OpenAI `/v1/embeddings` (bearer auth, `{model, input}` body).
    OpenAi,
    /// vLLM's OpenAI-compatible pooling server.
    Vllm,
    /// Hugging Face text-embeddings-inference `/embed`.
    Tei,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::OpenAi => write!(f, "OPENAI"),
            ProviderType::Vllm => write!(f, "VLLM"),
            ProviderType::Tei => write!(f, "TEI"),
        }
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPENAI" => Ok(ProviderType::OpenAi),
            "VLLM" => Ok(ProviderType::Vllm),
            "TEI" => Ok(ProviderType::Tei),
            other => Err(format!("invalid provider type: '{other}'")),
        }
    }
}

impl ProviderType {
    /// API path used when none is given at registration.
    pub fn default_api_path(&self) -> &'static str {
        match self {
            ProviderType::OpenAi | ProviderType::Vllm => "/v1/embeddings",
            ProviderType::Tei => "/embed",
        }
    }
}

/// Content modality an embedder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => write!(f, "TEXT"),
            Modality::Image => write!(f, "IMAGE"),
            Modality::Audio => write!(f, "AUDIO"),
            Modality::Video => write!(f, "VIDEO"),
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(Modality::Text),
            "IMAGE" => Ok(Modality::Image),
            "AUDIO" => Ok(Modality::Audio),
            "VIDEO" => Ok(Modality::Video),
            other => Err(format!("invalid modality: '{other}'")),
        }
    }
}

/// A registered embedding endpoint.
///
/// Immutable once registered: changing model, endpoint or dimensionality
/// means registering a new embedder and reprocessing the affected memories.
/// Credentials never appear here; only their fingerprint does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedder {
    pub id: Uuid,
    /// Unique handle a space's `embedding_model` refers to.
    pub name: String,
    pub provider_type: ProviderType,
    pub endpoint_url: String,
    pub api_path: String,
    /// Model identifier sent to the provider.
    pub model_identifier: String,
    /// Length of every vector this embedder produces.
    pub dimensionality: u32,
    /// Maximum input size per text, in bytes.
    pub max_sequence_length: Option<u32>,
    pub supported_modalities: BTreeSet<Modality>,
    pub labels: Labels,
    /// Maximum texts per provider call.
    pub max_batch_size: Option<u32>,
    /// Maximum concurrent in-flight calls across all workers.
    pub max_concurrency: Option<u32>,
    /// Per-call deadline.
    pub request_timeout_ms: Option<u64>,
    /// Short SHA-256 fingerprint of the stored credential, for display.
    pub credentials_fingerprint: Option<String>,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Embedder {
    /// Full URL the provider call is POSTed to.
    pub fn request_url(&self) -> String {
        let base = self.endpoint_url.trim_end_matches('/');
        let path = self.api_path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn supports(&self, modality: Modality) -> bool {
        self.supported_modalities.contains(&modality)
    }

    pub fn batch_size(&self) -> usize {
        self.max_batch_size.map(|n| n.max(1) as usize).unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// Texts per call when an embedder declares no batch limit.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Registration request for a new embedder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmbedder {
    pub name: String,
    pub provider_type: ProviderType,
    pub endpoint_url: String,
    /// Falls back to [`ProviderType::default_api_path`].
    pub api_path: Option<String>,
    pub model_identifier: String,
    pub dimensionality: u32,
    pub max_sequence_length: Option<u32>,
    #[serde(default = "default_modalities")]
    pub supported_modalities: BTreeSet<Modality>,
    #[serde(default)]
    pub labels: Labels,
    pub max_batch_size: Option<u32>,
    pub max_concurrency: Option<u32>,
    pub request_timeout_ms: Option<u64>,
    pub owner: Option<String>,
}

fn default_modalities() -> BTreeSet<Modality> {
    BTreeSet::from([Modality::Text])
}

impl NewEmbedder {
    /// Check the registration request before anything is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("embedder name must not be empty".to_string());
        }
        if self.model_identifier.trim().is_empty() {
            return Err("model identifier must not be empty".to_string());
        }
        if self.dimensionality == 0 {
            return Err("dimensionality must be a positive integer".to_string());
        }
        if !self.supported_modalities.contains(&Modality::Text) {
            return Err("embedder must support the TEXT modality".to_string());
        }
        if !(self.endpoint_url.starts_with("http://") || self.endpoint_url.starts_with("https://"))
        {
            return Err(format!(
                "endpoint URL must start with http:// or https://, got '{}'",
                self.endpoint_url
            ));
        }
        if let Some(path) = &self.api_path
            && !path.is_empty()
            && !path.starts_with('/')
        {
            return Err(format!("API path must start with '/', got '{path}'"));
        }
        for (field, value) in [
            ("max_sequence_length", self.max_sequence_length),
            ("max_batch_size", self.max_batch_size),
            ("max_concurrency", self.max_concurrency),
        ] {
            if value == Some(0) {
                return Err(format!("{field} must be positive when set"));
            }
        }
        if self.request_timeout_ms == Some(0) {
            return Err("request_timeout_ms must be positive when set".to_string());
        }
        Ok(())
    }

    pub fn resolved_api_path(&self) -> String {
        match &self.api_path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => self.provider_type.default_api_path().to_string(),
        }
    }
}
