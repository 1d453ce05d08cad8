//! Fixtures shared by unit tests in this crate.

use std::collections::BTreeSet;

use chrono::Utc;
use memoria_types::attributes::Labels;
use memoria_types::embedder::{Embedder, Modality, ProviderType};
use uuid::Uuid;

pub fn embedder(name: &str, dimensionality: u32) -> Embedder {
    let now = Utc::now();
    Embedder {
        id: Uuid::now_v7(),
        name: name.to_string(),
        provider_type: ProviderType::Tei,
        endpoint_url: "http://localhost:8080".to_string(),
        api_path: "/embed".to_string(),
        model_identifier: "bge-small".to_string(),
        dimensionality,
        max_sequence_length: None,
        supported_modalities: BTreeSet::from([Modality::Text]),
        labels: Labels::new(),
        max_batch_size: None,
        max_concurrency: None,
        request_timeout_ms: None,
        credentials_fingerprint: None,
        owner: None,
        created_at: now,
        updated_at: now,
        created_by: None,
        updated_by: None,
    }
}
