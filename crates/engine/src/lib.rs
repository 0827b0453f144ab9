//! The staged job engine: creation, claiming, stage execution, retries,
//! deduplication, pipeline chaining and failure monitoring.

mod backoff;
mod create;
mod dedup;
pub mod events;
mod monitor;
mod pipeline;
mod stages;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

pub use backoff::RetryPolicy;
pub use create::{NewJob, create_job, validate_parameters};
pub use dedup::{DedupEngine, DedupOptions, DedupOutcome};
pub use monitor::{Alert, AlertRule, AlertSeverity, Monitor};
pub use pipeline::PipelineCoordinator;
pub use stages::{StageEvent, StageOutcome, run_stage};
pub use worker::WorkerPool;

use bus::EventBus;
use embedding::Embedder;
use sift_core::{ChunkKind, ChunkingConfig, Config, CoreError, EngineConfig, ExtractConfig, JobStatus, ProcessingJob};
use store::{ChunkStore, JobStore};
use tracing::info;
use uuid::Uuid;
use vector::VectorIndex;

/// Everything the engine's moving parts share. Built once at process
/// start; read-only afterwards.
pub struct EngineContext {
  pub jobs: Arc<dyn JobStore>,
  pub chunks: Arc<dyn ChunkStore>,
  pub vectors: Arc<dyn VectorIndex>,
  pub bus: Arc<dyn EventBus>,
  pub embedder: Arc<Embedder>,
  pub chunking: ChunkingConfig,
  pub extract: ExtractConfig,
  pub engine: EngineConfig,
  pub dedup_options: DedupOptions,
  pub default_chunk_type: ChunkKind,
}

impl EngineContext {
  pub fn new(
    jobs: Arc<dyn JobStore>,
    chunks: Arc<dyn ChunkStore>,
    vectors: Arc<dyn VectorIndex>,
    bus: Arc<dyn EventBus>,
    embedder: Arc<Embedder>,
    config: &Config,
  ) -> Self {
    Self {
      jobs,
      chunks,
      vectors,
      bus,
      embedder,
      chunking: config.chunking.clone(),
      extract: config.extract.clone(),
      engine: config.engine.clone(),
      dedup_options: DedupOptions::default(),
      default_chunk_type: ChunkKind::FixedSize,
    }
  }
}

/// Engine facade: job lifecycle operations outside the worker loop.
pub struct Engine {
  ctx: Arc<EngineContext>,
}

impl Engine {
  pub fn new(ctx: Arc<EngineContext>) -> Self {
    Self { ctx }
  }

  pub fn context(&self) -> Arc<EngineContext> {
    self.ctx.clone()
  }

  pub async fn create_job(&self, request: NewJob) -> Result<ProcessingJob, CoreError> {
    create_job(self.ctx.jobs.as_ref(), request).await
  }

  pub async fn job(&self, id: Uuid) -> Result<Option<ProcessingJob>, CoreError> {
    Ok(self.ctx.jobs.find_by_id(id).await?)
  }

  pub async fn document_jobs(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>, CoreError> {
    Ok(self.ctx.jobs.find_by_document(document_id).await?)
  }

  pub async fn cancel_job(&self, id: Uuid) -> Result<ProcessingJob, CoreError> {
    let mut job = self
      .ctx
      .jobs
      .find_by_id(id)
      .await?
      .ok_or_else(|| CoreError::not_found(format!("job {id}")))?;
    job.cancel()?;
    self.ctx.jobs.save(&job).await?;
    info!(job_id = %id, "Job cancelled");
    Ok(job)
  }

  pub async fn stats(&self) -> Result<HashMap<JobStatus, usize>, CoreError> {
    Ok(self.ctx.jobs.count_by_status().await?)
  }

  /// Move retryable failures (shutdown leftovers included) back to
  /// pending. Called once at startup.
  pub async fn recover_failures(&self) -> Result<usize, CoreError> {
    let failures = self.ctx.jobs.find_retryable_failures().await?;
    let mut recovered = 0;
    for mut job in failures {
      if job.requeue().is_ok() {
        self.ctx.jobs.save(&job).await?;
        recovered += 1;
      }
    }
    if recovered > 0 {
      info!(recovered, "Requeued retryable failures");
    }
    Ok(recovered)
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use embedding::{EmbeddingProvider, HashEmbedder};
  use sift_core::EmbeddingConfig;
  use store::{MemoryChunkStore, MemoryJobStore};
  use vector::MemoryVectorIndex;

  pub const TEST_DIMENSION: usize = 64;

  pub async fn test_context() -> Arc<EngineContext> {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new("hash-test", TEST_DIMENSION));
    let embedding_config = EmbeddingConfig {
      batch_pause_ms: 0,
      ..EmbeddingConfig::default()
    };
    let mut config = Config::default();
    config.engine.poll_interval_ms = 5;
    config.engine.backoff_initial_ms = 1;
    config.engine.backoff_max_ms = 10;

    Arc::new(EngineContext::new(
      Arc::new(MemoryJobStore::new()),
      Arc::new(MemoryChunkStore::new()),
      Arc::new(MemoryVectorIndex::new(TEST_DIMENSION)),
      Arc::new(bus::MemoryBus::new()),
      Arc::new(Embedder::new(provider, &embedding_config)),
      &config,
    ))
  }
}
