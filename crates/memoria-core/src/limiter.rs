//! Client-side concurrency limiter keyed by embedder identity.
//!
//! Every worker calling the same embedder shares one semaphore, whatever
//! memory its chunk belongs to. Permits are RAII guards, so a call that
//! fails, times out or is dropped still gives its slot back.

use std::sync::Arc;

use dashmap::DashMap;
use memoria_types::embedder::Embedder;
use memoria_types::error::{EmbedError, ErrorCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EmbedderLimiter {
    semaphores: Arc<DashMap<Uuid, Arc<Semaphore>>>,
    default_max_concurrency: u32,
}

impl EmbedderLimiter {
    pub fn new(default_max_concurrency: u32) -> Self {
        Self {
            semaphores: Arc::new(DashMap::new()),
            default_max_concurrency: default_max_concurrency.max(1),
        }
    }

    fn semaphore(&self, embedder: &Embedder) -> Arc<Semaphore> {
        // Clone the Arc out so no DashMap guard is held across the await.
        self.semaphores
            .entry(embedder.id)
            .or_insert_with(|| {
                let permits = embedder
                    .max_concurrency
                    .unwrap_or(self.default_max_concurrency)
                    .max(1);
                Arc::new(Semaphore::new(permits as usize))
            })
            .clone()
    }

    /// Wait for a call slot on `embedder`.
    ///
    /// Fails only if the embedder's semaphore has been closed.
    pub async fn acquire(&self, embedder: &Embedder) -> Result<OwnedSemaphorePermit, EmbedError> {
        self.semaphore(embedder).acquire_owned().await.map_err(|_| {
            EmbedError::transient(
                ErrorCode::Internal,
                format!("concurrency limiter for embedder '{}' is closed", embedder.name),
            )
        })
    }

    /// Close `embedder`'s semaphore. Waiting and future `acquire` calls fail;
    /// permits already handed out stay valid.
    #[cfg(test)]
    pub(crate) fn close(&self, embedder: &Embedder) {
        if let Some((_, semaphore)) = self.semaphores.remove(&embedder.id) {
            semaphore.close();
        }
    }

    /// Slots currently free for `embedder`.
    pub fn available(&self, embedder: &Embedder) -> usize {
        self.semaphore(embedder).available_permits()
    }
}
