//! Process wiring: build every component once at startup, run until a
//! shutdown signal, stop cooperatively. No container, no globals; the
//! object graph is assembled right here.

use std::sync::Arc;
use std::time::Duration;

use bus::MemoryBus;
use embedding::{Embedder, EmbeddingProvider};
use engine::{Engine, EngineContext, Monitor, PipelineCoordinator, WorkerPool};
use llm::{LlmClient, OpenAiChatClient, ScriptedClient};
use search::{AnswerComposer, RetrievalEngine, SearchService};
use sift_core::Config;
use store::{MemoryChunkStore, MemoryJobStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vector::MemoryVectorIndex;

/// The assembled process: engine side and search side share the stores,
/// the index and the bus.
pub struct Runtime {
  pub engine: Engine,
  pub search: Arc<SearchService>,
  pub bus: MemoryBus,
  ctx: Arc<EngineContext>,
  monitor: Arc<Monitor>,
  cancel: CancellationToken,
}

impl Runtime {
  /// Wire everything from the validated configuration.
  pub fn build(config: &Config) -> anyhow::Result<Self> {
    let jobs = Arc::new(MemoryJobStore::new());
    let chunks = Arc::new(MemoryChunkStore::new());
    let vectors = Arc::new(MemoryVectorIndex::new(config.vector.vector_size));
    let bus = MemoryBus::new();

    let provider = <dyn EmbeddingProvider>::from_config(&config.embedding)?;
    let embedder = Arc::new(Embedder::new(provider, &config.embedding));

    let llm_client: Arc<dyn LlmClient> = match OpenAiChatClient::new(&config.llm) {
      Ok(client) => Arc::new(client),
      Err(e) => {
        warn!(error = %e, "LLM client unavailable, answers will be scripted");
        Arc::new(ScriptedClient::new(&config.llm.model))
      }
    };

    let ctx = Arc::new(EngineContext::new(
      jobs,
      chunks.clone(),
      vectors.clone(),
      Arc::new(bus.clone()),
      embedder.clone(),
      config,
    ));
    let engine = Engine::new(ctx.clone());

    let retrieval = RetrievalEngine::new(vectors.clone(), embedder);
    let composer = AnswerComposer::new(llm_client.clone());
    let search = Arc::new(SearchService::new(retrieval, composer, chunks, vectors, llm_client));

    Ok(Self {
      engine,
      search,
      bus,
      ctx,
      monitor: Arc::new(Monitor::with_default_rules()),
      cancel: CancellationToken::new(),
    })
  }

  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn monitor(&self) -> Arc<Monitor> {
    self.monitor.clone()
  }

  /// Start workers and consumers, then block until shutdown.
  pub async fn run(&self) -> anyhow::Result<()> {
    let recovered = self.engine.recover_failures().await?;
    if recovered > 0 {
      info!(recovered, "Recovered jobs from the previous run");
    }

    let pool = WorkerPool::new(self.ctx.clone());
    let cancel = self.cancel.clone();
    let pool_handle = tokio::spawn(async move { pool.run(cancel).await });

    let coordinator = Arc::new(PipelineCoordinator::new(self.ctx.clone()));
    let consumer = self
      .bus
      .subscribe("sift-pipeline", bus::topics::PIPELINE_TOPICS)
      .with_poll_interval(Duration::from_millis(20));
    let cancel = self.cancel.clone();
    let pipeline_handle = tokio::spawn(async move { consumer.run(coordinator, cancel).await });

    let monitor = self.monitor.clone();
    let consumer = self
      .bus
      .subscribe("sift-monitor", &[bus::topics::PROCESSING_FAILED])
      .with_poll_interval(Duration::from_millis(50));
    let cancel = self.cancel.clone();
    let monitor_handle = tokio::spawn(async move { consumer.run(monitor, cancel).await });

    info!("Runtime started");
    self.cancel.cancelled().await;
    info!("Shutdown signal received");

    let _ = pool_handle.await;
    let _ = pipeline_handle.await;
    let _ = monitor_handle.await;
    info!("Runtime stopped");
    Ok(())
  }
}
