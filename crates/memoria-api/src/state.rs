//! Application state wiring the pipeline together.
//!
//! The coordinator is generic over its repositories, provider backend and
//! content fetcher; AppState pins them to the concrete infra implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use memoria_core::coordinator::PipelineCoordinator;
use memoria_infra::config::{data_dir, load_config};
use memoria_infra::crypto::vault::VaultCrypto;
use memoria_infra::fetch::{FsContentStore, HttpContentFetcher, RoutingFetcher};
use memoria_infra::provider::HttpEmbeddingClient;
use memoria_infra::sqlite::embedder::SqliteEmbedderRepository;
use memoria_infra::sqlite::memory::SqliteMemoryRepository;
use memoria_infra::sqlite::pool::{DatabasePool, database_url};
use memoria_infra::sqlite::space::SqliteSpaceRepository;

pub type ConcreteCoordinator = PipelineCoordinator<
    SqliteMemoryRepository,
    SqliteSpaceRepository,
    SqliteEmbedderRepository,
    HttpEmbeddingClient<SqliteEmbedderRepository>,
    RoutingFetcher,
>;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ConcreteCoordinator>,
    /// Local content store; `submit --file` copies into it.
    pub store: FsContentStore,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config, open the database and wire
    /// the coordinator.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_config(&data_dir).await;
        let pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let vault = Arc::new(VaultCrypto::for_data_dir(&data_dir)?);

        let embedders = SqliteEmbedderRepository::new(pool.clone(), vault);
        let backend = HttpEmbeddingClient::new(embedders.clone())?;

        let store = FsContentStore::new(data_dir.join("content"));
        let http = HttpContentFetcher::new(
            Duration::from_millis(config.default_request_timeout_ms),
            config.max_content_bytes,
        )?;
        let fetcher = RoutingFetcher::new(store.clone(), http);

        let coordinator = PipelineCoordinator::new(
            SqliteMemoryRepository::new(pool.clone()),
            SqliteSpaceRepository::new(pool),
            embedders,
            backend,
            fetcher,
            config,
        );

        Ok(Self {
            coordinator: Arc::new(coordinator),
            store,
            data_dir,
        })
    }
}

/// Name recorded in `created_by` for operator actions.
pub fn operator() -> Option<String> {
    std::env::var("USER").ok().filter(|u| !u.is_empty())
}
