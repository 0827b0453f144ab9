//! Stage handlers: one per job kind, dispatched by the worker loop.
//!
//! Handlers catch and classify everything themselves; the worker only
//! looks at the returned `CoreError` kind to decide retry vs. fail.

mod chunk;
mod embed;
mod extract_stage;
mod index;

use serde_json::Value;
use sift_core::{CoreError, JobKind, ProcessingJob, ProcessingMetadata};

use crate::EngineContext;
use crate::dedup::DedupEngine;

/// Event a completed stage wants published, keyed by document id.
#[derive(Debug, Clone)]
pub struct StageEvent {
  pub topic: &'static str,
  pub payload: Value,
}

/// What a successful stage hands back to the worker.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
  pub result: Option<Value>,
  pub metadata: Option<ProcessingMetadata>,
  pub event: Option<StageEvent>,
}

pub async fn run_stage(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  match job.kind {
    JobKind::Extract => extract_stage::run(ctx, job).await,
    JobKind::Chunk => chunk::run(ctx, job).await,
    JobKind::Embed => embed::run(ctx, job).await,
    JobKind::Dedup => run_dedup(ctx, job).await,
    JobKind::Index => index::run_index(ctx, job).await,
    JobKind::FullPipeline => index::run_full_pipeline(ctx, job).await,
  }
}

async fn run_dedup(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  let engine = DedupEngine::new(ctx.chunks.clone(), ctx.vectors.clone(), ctx.dedup_options.clone());
  let outcome = engine.run(job.document_id).await?;

  let mut metadata = ProcessingMetadata {
    model_name: Some("content-hash-dedup".to_string()),
    ..ProcessingMetadata::default()
  };
  metadata.parameters.insert(
    "use_semantic_similarity".into(),
    Value::Bool(ctx.dedup_options.use_semantic_similarity),
  );

  Ok(StageOutcome {
    result: Some(serde_json::json!({
      "chunks_before": outcome.total_chunks,
      "chunks_after": outcome.total_chunks - outcome.removed_count,
      "removed_count": outcome.removed_count,
      "groups_count": outcome.groups_count,
    })),
    metadata: Some(metadata),
    event: Some(StageEvent {
      topic: bus::topics::CHUNKS_DEDUPLICATED,
      payload: serde_json::to_value(crate::events::ChunksDeduplicated {
        document_id: job.document_id,
        removed_count: outcome.removed_count,
        groups_count: outcome.groups_count,
      })
      .map_err(|e| CoreError::internal(e.to_string()))?,
    }),
  })
}
