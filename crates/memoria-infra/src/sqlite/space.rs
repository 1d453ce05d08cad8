//! SQLite space repository implementation.

use memoria_core::repository::space::SpaceRepository;
use memoria_types::config::ChunkingConfig;
use memoria_types::error::RepositoryError;
use memoria_types::space::Space;
use sqlx::Row;
use uuid::Uuid;

use super::pool::{DatabasePool, format_datetime, is_unique_violation, parse_datetime, query_error};

/// SQLite-backed implementation of `SpaceRepository`.
#[derive(Clone)]
pub struct SqliteSpaceRepository {
    pool: DatabasePool,
}

impl SqliteSpaceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct SpaceRow {
    id: String,
    name: String,
    embedding_model: String,
    max_chunk_size: i64,
    overlap_size: i64,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    updated_by: Option<String>,
}

impl SpaceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            embedding_model: row.try_get("embedding_model")?,
            max_chunk_size: row.try_get("max_chunk_size")?,
            overlap_size: row.try_get("overlap_size")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
        })
    }

    fn into_space(self) -> Result<Space, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid space id: {e}")))?;
        Ok(Space {
            id,
            name: self.name,
            embedding_model: self.embedding_model,
            chunking: ChunkingConfig::new(self.max_chunk_size as u32, self.overlap_size as u32),
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

impl SpaceRepository for SqliteSpaceRepository {
    async fn create(&self, space: &Space) -> Result<Space, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO spaces (id, name, embedding_model, max_chunk_size, overlap_size, created_at, updated_at, created_by, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(space.id.to_string())
        .bind(&space.name)
        .bind(&space.embedding_model)
        .bind(i64::from(space.chunking.max_chunk_size))
        .bind(i64::from(space.chunking.overlap_size))
        .bind(format_datetime(&space.created_at))
        .bind(format_datetime(&space.updated_at))
        .bind(&space.created_by)
        .bind(&space.updated_by)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(space.clone()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "a space named '{}' already exists",
                space.name
            ))),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<Space>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM spaces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| SpaceRow::from_row(&row).map_err(query_error)?.into_space())
            .transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Space>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM spaces WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| SpaceRow::from_row(&row).map_err(query_error)?.into_space())
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Space>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM spaces ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut spaces = Vec::with_capacity(rows.len());
        for row in &rows {
            spaces.push(SpaceRow::from_row(row).map_err(query_error)?.into_space()?);
        }
        Ok(spaces)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sqlite::embedder::SqliteEmbedderRepository;
    use crate::sqlite::embedder::tests::{make_embedder, test_vault};
    use crate::sqlite::pool::test_pool;
    use chrono::Utc;
    use memoria_core::repository::embedder::EmbedderRepository;

    pub(crate) fn make_space(name: &str, embedding_model: &str) -> Space {
        let now = Utc::now();
        Space {
            id: Uuid::now_v7(),
            name: name.to_string(),
            embedding_model: embedding_model.to_string(),
            chunking: ChunkingConfig::new(2000, 200),
            created_at: now,
            updated_at: now,
            created_by: Some("tester".to_string()),
            updated_by: None,
        }
    }

    async fn setup() -> (DatabasePool, SqliteSpaceRepository) {
        let pool = test_pool().await;
        SqliteEmbedderRepository::new(pool.clone(), test_vault())
            .create(&make_embedder("small", 4), None)
            .await
            .unwrap();
        (pool.clone(), SqliteSpaceRepository::new(pool))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_pool, repo) = setup().await;
        let space = make_space("notes", "small");
        repo.create(&space).await.unwrap();

        let by_id = repo.get_by_id(&space.id).await.unwrap().unwrap();
        assert_eq!(by_id.name, "notes");
        assert_eq!(by_id.chunking, ChunkingConfig::new(2000, 200));

        let by_name = repo.get_by_name("notes").await.unwrap().unwrap();
        assert_eq!(by_name.id, space.id);
        assert!(repo.get_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (_pool, repo) = setup().await;
        repo.create(&make_space("notes", "small")).await.unwrap();
        let err = repo.create(&make_space("notes", "small")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_embedding_model_rejected() {
        let (_pool, repo) = setup().await;
        let err = repo.create(&make_space("orphan", "no-such-model")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_list() {
        let (_pool, repo) = setup().await;
        repo.create(&make_space("b", "small")).await.unwrap();
        repo.create(&make_space("a", "small")).await.unwrap();
        let names: Vec<String> = repo.list().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
