//! Shared harness for engine integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bus::{EventBus, EventEnvelope, EventHandler, MemoryBus, Message};
use embedding::{Embedder, EmbeddingError, EmbeddingMode, EmbeddingProvider, HashEmbedder};
use engine::{EngineContext, PipelineCoordinator, WorkerPool};
use sift_core::{ChunkKind, Config, CoreError, EmbeddingConfig, JobStatus};
use store::{MemoryChunkStore, MemoryJobStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vector::MemoryVectorIndex;

pub const DIMENSION: usize = 64;

/// Embedding provider that fails a configured number of calls first.
pub struct FlakyProvider {
  inner: HashEmbedder,
  failures_remaining: AtomicU32,
}

impl FlakyProvider {
  pub fn new(failures: u32) -> Self {
    Self {
      inner: HashEmbedder::new("hash-test", DIMENSION),
      failures_remaining: AtomicU32::new(failures),
    }
  }
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
  fn name(&self) -> &str {
    "flaky"
  }

  fn model_id(&self) -> &str {
    self.inner.model_id()
  }

  fn dimensions(&self) -> usize {
    DIMENSION
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let remaining = self.failures_remaining.load(Ordering::SeqCst);
    if remaining > 0 {
      self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
      return Err(EmbeddingError::Provider("503: embedder unavailable".into()));
    }
    self.inner.embed_batch(texts, mode).await
  }
}

/// Records `(document_id, topic)` pairs in delivery order.
pub struct EventRecorder {
  seen: Mutex<Vec<(Uuid, String)>>,
}

impl EventRecorder {
  pub fn new() -> Self {
    Self {
      seen: Mutex::new(Vec::new()),
    }
  }

  pub fn topics_for(&self, document_id: Uuid) -> Vec<String> {
    self
      .seen
      .lock()
      .unwrap()
      .iter()
      .filter(|(d, _)| *d == document_id)
      .map(|(_, t)| t.clone())
      .collect()
  }

  pub fn count_for_topic(&self, topic: &str) -> usize {
    self.seen.lock().unwrap().iter().filter(|(_, t)| t == topic).count()
  }
}

#[async_trait]
impl EventHandler for EventRecorder {
  async fn handle(&self, message: &Message) -> Result<(), CoreError> {
    let document_id = message
      .envelope
      .data
      .get("document_id")
      .and_then(|v| v.as_str())
      .and_then(|s| Uuid::parse_str(s).ok())
      .unwrap_or(Uuid::nil());
    self.seen.lock().unwrap().push((document_id, message.topic.clone()));
    Ok(())
  }
}

pub struct Harness {
  pub ctx: Arc<EngineContext>,
  pub bus: MemoryBus,
  pub jobs: Arc<MemoryJobStore>,
  pub chunks: Arc<MemoryChunkStore>,
  pub vectors: Arc<MemoryVectorIndex>,
  pub recorder: Arc<EventRecorder>,
  pub cancel: CancellationToken,
}

impl Harness {
  pub fn with_provider(provider: Arc<dyn EmbeddingProvider>, workers: usize) -> Self {
    let jobs = Arc::new(MemoryJobStore::new());
    let chunks = Arc::new(MemoryChunkStore::new());
    let vectors = Arc::new(MemoryVectorIndex::new(DIMENSION));
    let bus = MemoryBus::new();

    let embedding_config = EmbeddingConfig {
      batch_pause_ms: 0,
      ..EmbeddingConfig::default()
    };
    let mut config = Config::default();
    config.engine.max_concurrent_processing = workers;
    config.engine.poll_interval_ms = 5;
    config.engine.backoff_initial_ms = 1;
    config.engine.backoff_max_ms = 20;
    config.chunking.min_chunk_size = 1;

    let mut ctx = EngineContext::new(
      jobs.clone(),
      chunks.clone(),
      vectors.clone(),
      Arc::new(bus.clone()),
      Arc::new(Embedder::new(provider, &embedding_config)),
      &config,
    );
    ctx.default_chunk_type = ChunkKind::Paragraph;

    Self {
      ctx: Arc::new(ctx),
      bus,
      jobs,
      chunks,
      vectors,
      recorder: Arc::new(EventRecorder::new()),
      cancel: CancellationToken::new(),
    }
  }

  pub fn new(workers: usize) -> Self {
    Self::with_provider(Arc::new(HashEmbedder::new("hash-test", DIMENSION)), workers)
  }

  /// Spawn the worker pool, the pipeline coordinator and the recorder.
  pub fn start(&self) {
    let pool = WorkerPool::new(self.ctx.clone());
    let cancel = self.cancel.clone();
    tokio::spawn(async move { pool.run(cancel).await });

    let coordinator = Arc::new(PipelineCoordinator::new(self.ctx.clone()));
    let consumer = self
      .bus
      .subscribe("pipeline", bus::topics::PIPELINE_TOPICS)
      .with_poll_interval(Duration::from_millis(5));
    let cancel = self.cancel.clone();
    tokio::spawn(async move { consumer.run(coordinator, cancel).await });

    let recorder = self.recorder.clone();
    let consumer = self
      .bus
      .subscribe("test-recorder", bus::topics::PIPELINE_TOPICS)
      .with_poll_interval(Duration::from_millis(5));
    let cancel = self.cancel.clone();
    tokio::spawn(async move { consumer.run(recorder, cancel).await });
  }

  pub async fn upload_document(&self, document_id: Uuid, user_id: Uuid, file_path: &str, file_type: &str) {
    let data = serde_json::json!({
      "document_id": document_id,
      "user_id": user_id,
      "file_path": file_path,
      "file_type": file_type,
    });
    self
      .bus
      .publish(
        bus::topics::DOCUMENT_UPLOADED,
        Some(&document_id.to_string()),
        EventEnvelope::new("document_uploaded", data),
      )
      .await
      .unwrap();
  }

  /// Poll until `check` returns true or the timeout elapses.
  pub async fn wait_until<F, Fut>(&self, timeout: Duration, mut check: F) -> bool
  where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
  {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      if check().await {
        return true;
      }
      if tokio::time::Instant::now() >= deadline {
        return false;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  /// Wait for the whole pipeline of a document to finish (dedup done).
  pub async fn wait_for_pipeline(&self, document_id: Uuid, timeout: Duration) -> bool {
    let jobs = self.jobs.clone();
    self
      .wait_until(timeout, move || {
        let jobs = jobs.clone();
        async move {
          use store::JobStore;
          jobs
            .find_by_document(document_id)
            .await
            .unwrap()
            .iter()
            .any(|j| j.kind == sift_core::JobKind::Dedup && j.status == JobStatus::Completed)
        }
      })
      .await
  }

  pub fn stop(&self) {
    self.cancel.cancel();
  }
}

/// Write a temp file and return its keep-alive guard and path.
pub fn temp_file(content: &str) -> (tempfile::TempDir, String) {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("document.txt");
  std::fs::write(&path, content).unwrap();
  (dir, path.to_string_lossy().into_owned())
}
