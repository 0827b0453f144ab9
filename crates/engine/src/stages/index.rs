//! Index and full-pipeline kinds: thin orchestrators over the real stages.

use sift_core::{CoreError, JobKind, ProcessingJob};
use tracing::debug;
use uuid::Uuid;

use super::StageOutcome;
use crate::EngineContext;
use crate::create::{NewJob, create_job};

/// Verify every chunk of the document is embedded and its point is live.
pub async fn run_index(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  let chunks = ctx.chunks.find_by_document(job.document_id).await?;
  let chunk_count = chunks.len();

  let point_ids: Vec<Uuid> = chunks.iter().filter_map(|c| c.embedding_id).collect();
  let embedded_count = point_ids.len();

  if embedded_count < chunk_count {
    // Embeddings still outstanding; retry once the embed stage lands.
    return Err(CoreError::external(format!(
      "document {} has {} of {} chunks embedded",
      job.document_id, embedded_count, chunk_count
    )));
  }

  let live_points = ctx.vectors.get(&point_ids).await.map_err(CoreError::from)?;
  if live_points.len() < point_ids.len() {
    return Err(CoreError::external(format!(
      "index is missing {} points for document {}",
      point_ids.len() - live_points.len(),
      job.document_id
    )));
  }

  debug!(job_id = %job.id, document_id = %job.document_id, chunk_count, "Index verification complete");
  Ok(StageOutcome {
    result: Some(serde_json::json!({
      "chunk_count": chunk_count,
      "indexed_count": live_points.len(),
      "collection": job.param_str("collection_name"),
    })),
    metadata: None,
    event: None,
  })
}

/// Kick off the staged pipeline by creating the extract job; the rest of
/// the chain rides on stage-completion events.
pub async fn run_full_pipeline(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  let mut request = NewJob::new(job.document_id, job.user_id, JobKind::Extract).with_priority(job.priority);
  request.parameters = job.parameters.clone();
  request.max_retries = job.max_retries;

  let extract_job = match create_job(ctx.jobs.as_ref(), request).await {
    Ok(created) => created.id,
    // An extract job already running for this document is this pipeline's.
    Err(err) if err.kind == sift_core::ErrorKind::Conflict => {
      let existing = ctx.jobs.find_active(job.document_id, JobKind::Extract).await?;
      existing.map(|j| j.id).ok_or(err)?
    }
    Err(err) => return Err(err),
  };

  Ok(StageOutcome {
    result: Some(serde_json::json!({ "extract_job_id": extract_job })),
    metadata: None,
    event: None,
  })
}
