//! End-to-end pipeline scenarios against a real SQLite database.
//!
//! Content comes from an in-memory store and embeddings from a scripted
//! backend, so every provider response is deterministic.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use memoria_core::coordinator::PipelineCoordinator;
use memoria_core::embedding::EmbeddingBackend;
use memoria_core::fetch::{ContentFetcher, FetchedContent};
use memoria_core::repository::embedder::EmbedderRepository;
use memoria_core::repository::memory::{IngestResult, MemoryRepository, WriteResult};
use memoria_infra::crypto::vault::VaultCrypto;
use memoria_infra::sqlite::embedder::SqliteEmbedderRepository;
use memoria_infra::sqlite::memory::SqliteMemoryRepository;
use memoria_infra::sqlite::pool::DatabasePool;
use memoria_infra::sqlite::space::SqliteSpaceRepository;
use memoria_types::attributes::Metadata;
use memoria_types::config::{ChunkingConfig, PipelineConfig, RetryPolicyConfig};
use memoria_types::embedder::{Embedder, Modality, NewEmbedder, ProviderType};
use memoria_types::error::{EmbedError, ErrorCode, PipelineError, RepositoryError};
use memoria_types::memory::{IngestState, NewMemory, ProcessingStatus, VectorStatus};
use memoria_types::space::NewSpace;
use tokio::sync::Semaphore;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct InMemoryContent {
    objects: Arc<Mutex<HashMap<String, FetchedContent>>>,
    /// Number of upcoming fetches that time out.
    timeouts: Arc<AtomicUsize>,
}

impl InMemoryContent {
    fn time_out_next(&self, n: usize) {
        self.timeouts.store(n, Ordering::SeqCst);
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            FetchedContent {
                bytes: bytes.to_vec(),
                content_type: Some(content_type.to_string()),
            },
        );
    }
}

impl ContentFetcher for InMemoryContent {
    async fn fetch(&self, content_ref: &str) -> Result<FetchedContent, PipelineError> {
        if take_one(&self.timeouts) {
            return Err(PipelineError::DeadlineExceeded(format!(
                "fetching {content_ref} timed out"
            )));
        }
        self.objects
            .lock()
            .unwrap()
            .get(content_ref)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("content", content_ref))
    }
}

/// Decrement `counter` if it is positive; true when it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Embedder storage whose name lookups can be made to fail, as a locked or
/// unreachable database would.
#[derive(Clone)]
struct FlakyEmbedders {
    inner: SqliteEmbedderRepository,
    failures: Arc<AtomicUsize>,
}

impl FlakyEmbedders {
    fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl EmbedderRepository for FlakyEmbedders {
    async fn create(&self, embedder: &Embedder, credentials: Option<&str>) -> Result<Embedder, RepositoryError> {
        self.inner.create(embedder, credentials).await
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<Embedder>, RepositoryError> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Embedder>, RepositoryError> {
        if take_one(&self.failures) {
            return Err(RepositoryError::Query("database is locked".to_string()));
        }
        self.inner.get_by_name(name).await
    }

    async fn list(&self) -> Result<Vec<Embedder>, RepositoryError> {
        self.inner.list().await
    }
}

/// Scripted responses are consumed in order, one per call; once the script
/// runs out every call succeeds with correctly sized vectors.
#[derive(Clone, Default)]
struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Result<Option<usize>, EmbedError>>>>,
    calls: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<usize>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedBackend {
    fn with_script(script: Vec<Result<Option<usize>, EmbedError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl EmbeddingBackend for ScriptedBackend {
    async fn embed_batch(&self, embedder: &Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(texts.len());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let next = self.script.lock().unwrap().pop_front();
        // `Some(n)` overrides the vector length to simulate a misconfigured model.
        let dims = match next {
            Some(Err(e)) => return Err(e),
            Some(Ok(Some(n))) => n,
            Some(Ok(None)) | None => embedder.dimensionality as usize,
        };
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, _)| vec![i as f32; dims])
            .collect())
    }
}

type Coordinator = PipelineCoordinator<
    SqliteMemoryRepository,
    SqliteSpaceRepository,
    FlakyEmbedders,
    ScriptedBackend,
    InMemoryContent,
>;

struct Harness {
    coordinator: Arc<Coordinator>,
    memories: SqliteMemoryRepository,
    embedders: FlakyEmbedders,
    content: InMemoryContent,
    backend: ScriptedBackend,
    pool: DatabasePool,
    config: PipelineConfig,
    space_id: Uuid,
    _dir: tempfile::TempDir,
}

async fn harness(backend: ScriptedBackend) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("pipeline.db").display());
    let pool = DatabasePool::new(&url).await.unwrap();
    let vault = Arc::new(VaultCrypto::new(&[3u8; 32]));

    let memories = SqliteMemoryRepository::new(pool.clone());
    let content = InMemoryContent::default();
    let config = PipelineConfig {
        workers: 2,
        retry: RetryPolicyConfig {
            max_attempts: 5,
            base_delay_ms: 0,
            multiplier: 2.0,
            max_delay_ms: 0,
            jitter: 0.0,
        },
        ..PipelineConfig::default()
    };

    let embedders = FlakyEmbedders {
        inner: SqliteEmbedderRepository::new(pool.clone(), vault),
        failures: Arc::new(AtomicUsize::new(0)),
    };

    let coordinator = Arc::new(PipelineCoordinator::new(
        memories.clone(),
        SqliteSpaceRepository::new(pool.clone()),
        embedders.clone(),
        backend.clone(),
        content.clone(),
        config.clone(),
    ));

    coordinator
        .register_embedder(
            NewEmbedder {
                name: "minilm".to_string(),
                provider_type: ProviderType::Tei,
                endpoint_url: "http://localhost:8080".to_string(),
                api_path: None,
                model_identifier: "all-MiniLM-L6-v2".to_string(),
                dimensionality: 4,
                max_sequence_length: None,
                supported_modalities: BTreeSet::from([Modality::Text]),
                labels: Default::default(),
                max_batch_size: None,
                max_concurrency: Some(2),
                request_timeout_ms: None,
                owner: None,
            },
            None,
            None,
        )
        .await
        .unwrap();
    let space = coordinator
        .create_space(NewSpace {
            name: "docs".to_string(),
            embedding_model: "minilm".to_string(),
            chunking: Some(ChunkingConfig::new(2000, 200)),
            created_by: None,
        })
        .await
        .unwrap();

    Harness {
        coordinator,
        memories,
        embedders,
        content,
        backend,
        pool,
        config,
        space_id: space.id,
        _dir: dir,
    }
}

impl Harness {
    async fn submit(&self, key: &str, bytes: &[u8]) -> Uuid {
        self.content.put(key, bytes, "text/plain");
        self.coordinator
            .submit(NewMemory {
                space_id: self.space_id,
                content_ref: key.to_string(),
                content_type: "text/plain".to_string(),
                metadata: Metadata::default(),
                created_by: None,
            })
            .await
            .unwrap()
    }

    /// Process claimable chunks until none are left.
    async fn drain(&self) -> Vec<WriteResult> {
        drain(&self.coordinator).await
    }

    /// A second coordinator over the same database, as a restarted process
    /// would build it: nothing cached.
    fn restarted(&self) -> Coordinator {
        PipelineCoordinator::new(
            self.memories.clone(),
            SqliteSpaceRepository::new(self.pool.clone()),
            self.embedders.clone(),
            self.backend.clone(),
            self.content.clone(),
            self.config.clone(),
        )
    }
}

async fn drain(coordinator: &Coordinator) -> Vec<WriteResult> {
    let mut results = Vec::new();
    while let Some(batch) = coordinator.process_next().await.unwrap() {
        results.extend(batch);
    }
    results
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ten_thousand_chars_make_six_overlapping_chunks() {
    let h = harness(ScriptedBackend::default()).await;
    let text = "abcdefghij".repeat(1_000);
    let memory_id = h.submit("doc.txt", text.as_bytes()).await;

    assert_eq!(h.coordinator.ingest_pending().await.unwrap(), 1);
    let results = h.drain().await;
    assert_eq!(results.len(), 6);

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    let spans: Vec<(u64, u64)> = report
        .chunks
        .iter()
        .map(|c| (c.start_offset, c.end_offset))
        .collect();
    assert_eq!(
        spans,
        vec![
            (0, 2000),
            (1800, 3800),
            (3600, 5600),
            (5400, 7400),
            (7200, 9200),
            (9000, 10000),
        ]
    );
    assert!(report
        .chunks
        .iter()
        .all(|c| c.vector_status == VectorStatus::Generated));

    let stored = h.memories.list_chunks(&memory_id).await.unwrap();
    assert!(stored.iter().all(|c| c.embedding_vector.as_ref().map(Vec::len) == Some(4)));
    // All six chunks share one provider call.
    assert_eq!(h.backend.batches(), vec![6]);
}

#[tokio::test]
async fn rate_limited_twice_then_generated_on_third_attempt() {
    let h = harness(ScriptedBackend::with_script(vec![
        Err(EmbedError::rate_limited(None)),
        Err(EmbedError::rate_limited(None)),
        Ok(None),
    ]))
    .await;
    let memory_id = h.submit("short.txt", b"a short note").await;
    h.coordinator.ingest_pending().await.unwrap();

    let first = h.coordinator.process_next().await.unwrap().unwrap();
    assert_eq!(first, vec![WriteResult::Committed(ProcessingStatus::Processing)]);
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.chunks[0].vector_status, VectorStatus::Failed);
    assert!(!report.chunks[0].terminal);
    assert_eq!(
        report.chunks[0].failure.as_ref().unwrap().code,
        ErrorCode::ResourceExhausted
    );

    h.drain().await;

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert_eq!(report.chunks[0].vector_status, VectorStatus::Generated);
    assert_eq!(report.chunks[0].attempt_count, 3);
    assert!(report.chunks[0].failure.is_none());
    assert_eq!(h.backend.calls(), 3);
}

#[tokio::test]
async fn rate_limited_on_every_attempt_exhausts_the_budget() {
    let h = harness(ScriptedBackend::with_script(
        (0..5).map(|_| Err(EmbedError::rate_limited(None))).collect(),
    ))
    .await;
    let memory_id = h.submit("busy.txt", b"the provider is overloaded").await;
    h.coordinator.ingest_pending().await.unwrap();

    let results = h.drain().await;
    assert_eq!(results.len(), 5);
    assert_eq!(
        results.last(),
        Some(&WriteResult::Committed(ProcessingStatus::Failed))
    );

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Failed);
    let chunk = &report.chunks[0];
    assert!(chunk.terminal);
    assert_eq!(chunk.attempt_count, 5);
    assert_eq!(chunk.failure.as_ref().unwrap().code, ErrorCode::ResourceExhausted);
    assert!(chunk.next_attempt_at.is_none());
    assert_eq!(h.backend.calls(), 5);
}

#[tokio::test]
async fn wrong_dimensionality_fails_without_retry() {
    let h = harness(ScriptedBackend::with_script(vec![Ok(Some(7))])).await;
    let memory_id = h.submit("note.txt", b"hello").await;
    h.coordinator.ingest_pending().await.unwrap();

    let results = h.drain().await;
    assert_eq!(results, vec![WriteResult::Committed(ProcessingStatus::Failed)]);

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Failed);
    let chunk = &report.chunks[0];
    assert_eq!(chunk.vector_status, VectorStatus::Failed);
    assert!(chunk.terminal);
    assert_eq!(chunk.attempt_count, 1);
    assert_eq!(chunk.failure.as_ref().unwrap().code, ErrorCode::InvalidArgument);
    assert_eq!(h.backend.calls(), 1);

    // Reprocessing grants a fresh budget and the next call succeeds.
    let status = h.coordinator.reprocess(&memory_id, None).await.unwrap();
    assert_eq!(status, ProcessingStatus::Processing);
    h.drain().await;
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert_eq!(report.chunks[0].attempt_count, 1);
}

#[tokio::test]
async fn empty_content_completes_without_provider_calls() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h.submit("empty.txt", b"").await;

    h.coordinator.ingest_pending().await.unwrap();
    assert!(h.drain().await.is_empty());

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert!(report.chunks.is_empty());
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn delete_during_processing_discards_in_flight_results() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(ScriptedBackend::gated(Arc::clone(&gate))).await;
    let text = "x".repeat(3_000);
    let memory_id = h.submit("two.txt", text.as_bytes()).await;
    h.coordinator.ingest_pending().await.unwrap();

    let coordinator = Arc::clone(&h.coordinator);
    let in_flight = tokio::spawn(async move { coordinator.process_next().await });
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.backend.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the batch should reach the provider");

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.tally.processing, 2);
    assert_eq!(h.backend.batches(), vec![2]);

    h.coordinator.delete_memory(&memory_id).await.unwrap();
    gate.add_permits(1);

    let results = in_flight.await.unwrap().unwrap();
    assert_eq!(
        results,
        Some(vec![WriteResult::Discarded, WriteResult::Discarded])
    );
    assert!(h.memories.list_chunks(&memory_id).await.unwrap().is_empty());
    assert_eq!(
        h.coordinator.get_status(&memory_id).await.unwrap_err().code(),
        ErrorCode::NotFound
    );
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_content_fails_ingestion_and_reprocess_retries_it() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h
        .coordinator
        .submit(NewMemory {
            space_id: h.space_id,
            content_ref: "later.txt".to_string(),
            content_type: "text/plain".to_string(),
            metadata: Metadata::default(),
            created_by: None,
        })
        .await
        .unwrap();

    h.coordinator.ingest_pending().await.unwrap();
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Failed);

    h.content.put("later.txt", b"now it exists", "text/plain");
    assert_eq!(
        h.coordinator.reprocess(&memory_id, None).await.unwrap(),
        ProcessingStatus::Pending
    );
    h.coordinator.ingest_pending().await.unwrap();
    h.drain().await;
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn restart_requeues_abandoned_claims() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h.submit("crash.txt", b"interrupted").await;
    let memory = h.memories.get_by_id(&memory_id).await.unwrap().unwrap();
    assert!(matches!(
        h.coordinator.ingest(&memory).await.unwrap(),
        IngestResult::Committed(ProcessingStatus::Processing)
    ));

    // A claim whose worker never reported back, taken well before the lease.
    let claimed_at = chrono::Utc::now() - chrono::Duration::minutes(10);
    let claim = h.memories.claim_next(claimed_at).await.unwrap().unwrap();
    assert_eq!(claim.attempt, 1);

    let recovered = h.coordinator.recover().await.unwrap();
    assert_eq!(recovered.requeued, 1);

    h.drain().await;
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert_eq!(report.chunks[0].attempt_count, 2);
}

#[tokio::test]
async fn restart_leaves_live_claims_alone() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h.submit("busy.txt", b"still being embedded").await;
    h.coordinator.ingest_pending().await.unwrap();

    // Another process is mid-call on this chunk.
    let claim = h.memories.claim_next(chrono::Utc::now()).await.unwrap().unwrap();

    let recovered = h.restarted().recover().await.unwrap();
    assert_eq!(recovered.requeued, 0);
    assert_eq!(recovered.exhausted, 0);
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.tally.processing, 1);
    assert!(h.drain().await.is_empty());

    let committed = h
        .memories
        .write_outcome(
            &claim,
            &memoria_core::repository::memory::ChunkOutcome::Generated {
                vector: vec![0.0; 4],
            },
            chrono::Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(committed, WriteResult::Committed(ProcessingStatus::Completed));
}

#[tokio::test]
async fn expired_claim_is_retried_without_a_restart() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h.submit("stuck.txt", b"worker vanished").await;
    h.coordinator.ingest_pending().await.unwrap();

    let claimed_at = chrono::Utc::now() - chrono::Duration::minutes(10);
    h.memories.claim_next(claimed_at).await.unwrap().unwrap();
    assert!(h.drain().await.is_empty());

    let released = h.coordinator.expire_claims().await.unwrap();
    assert_eq!(released.requeued, 1);

    h.drain().await;
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert_eq!(report.chunks[0].attempt_count, 2);
}

#[tokio::test]
async fn embedder_lookup_outage_is_retried() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h.submit("outage.txt", b"embedder row unreachable").await;
    h.coordinator.ingest_pending().await.unwrap();

    let restarted = h.restarted();
    h.embedders.fail_next(1);
    let first = restarted.process_next().await.unwrap().unwrap();
    assert_eq!(first, vec![WriteResult::Committed(ProcessingStatus::Processing)]);

    let report = restarted.get_status(&memory_id).await.unwrap();
    let chunk = &report.chunks[0];
    assert_eq!(chunk.vector_status, VectorStatus::Failed);
    assert!(!chunk.terminal);
    assert_eq!(chunk.failure.as_ref().unwrap().code, ErrorCode::Internal);
    assert_eq!(h.backend.calls(), 0);

    drain(&restarted).await;
    let report = restarted.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert_eq!(report.chunks[0].attempt_count, 2);
}

#[tokio::test]
async fn fetch_timeout_retries_ingestion() {
    let h = harness(ScriptedBackend::default()).await;
    h.content.time_out_next(1);
    let memory_id = h.submit("slow.txt", b"eventually reachable").await;

    assert_eq!(h.coordinator.ingest_pending().await.unwrap(), 1);
    let memory = h.memories.get_by_id(&memory_id).await.unwrap().unwrap();
    assert_eq!(memory.processing_status, ProcessingStatus::Pending);
    assert_eq!(memory.ingest, IngestState::NotChunked);
    assert_eq!(memory.ingest_attempts, 1);
    assert!(memory.next_ingest_at.is_some());

    assert_eq!(h.coordinator.ingest_pending().await.unwrap(), 1);
    h.drain().await;
    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Completed);
    assert!(report.next_ingest_at.is_none());
}

#[tokio::test]
async fn persistent_fetch_timeouts_fail_ingestion() {
    let h = harness(ScriptedBackend::default()).await;
    h.content.time_out_next(usize::MAX);
    let memory_id = h.submit("down.txt", b"never reachable").await;

    for _ in 0..5 {
        h.coordinator.ingest_pending().await.unwrap();
    }
    assert_eq!(h.coordinator.ingest_pending().await.unwrap(), 0);

    let report = h.coordinator.get_status(&memory_id).await.unwrap();
    assert_eq!(report.processing_status, ProcessingStatus::Failed);
    assert_eq!(report.ingest_attempts, 4);
    match report.ingest {
        IngestState::Failed { failure } => assert_eq!(failure.code, ErrorCode::DeadlineExceeded),
        other => panic!("expected a failed ingestion, got {other:?}"),
    }
}

#[tokio::test]
async fn run_processes_until_cancelled() {
    let h = harness(ScriptedBackend::default()).await;
    let memory_id = h.submit("bg.txt", &"y".repeat(5_000).into_bytes()).await;

    let cancel = tokio_util::sync::CancellationToken::new();
    let runner = tokio::spawn(Arc::clone(&h.coordinator).run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let report = h.coordinator.get_status(&memory_id).await.unwrap();
            if report.processing_status == ProcessingStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pipeline should complete the memory");

    cancel.cancel();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_memory_is_not_found() {
    let h = harness(ScriptedBackend::default()).await;
    let missing = Uuid::now_v7();
    assert_eq!(
        h.coordinator.get_status(&missing).await.unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(
        h.coordinator.reprocess(&missing, None).await.unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(
        h.coordinator.delete_memory(&missing).await.unwrap_err().code(),
        ErrorCode::NotFound
    );
}
