use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ChunkingConfig;

/// A named container of memories that share one embedding model.
///
/// Every chunk vector stored under a space has the dimensionality of the
/// embedder named by `embedding_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub id: Uuid,
    /// Unique display name.
    pub name: String,
    /// Name of the embedder this space's chunks are embedded with.
    pub embedding_model: String,
    pub chunking: ChunkingConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

/// Request to create a space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSpace {
    pub name: String,
    pub embedding_model: String,
    /// Falls back to the pipeline's default chunking when absent.
    pub chunking: Option<ChunkingConfig>,
    pub created_by: Option<String>,
}
