//! Chunk stage: fragment the extracted text and persist the fragments.

use chunker::ChunkOptions;
use serde_json::Value;
use sift_core::{ChunkKind, CoreError, JobKind, JobStatus, ProcessingJob, TextChunk};
use tracing::debug;
use uuid::Uuid;

use super::{StageEvent, StageOutcome};
use crate::EngineContext;
use crate::events::ChunksCreated;

/// Upstream text is capped at 10 MB encoded.
const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// The extracted text persisted by this document's completed extract job.
async fn upstream_text(ctx: &EngineContext, document_id: Uuid) -> Result<(String, Option<String>), CoreError> {
  let jobs = ctx.jobs.find_by_document(document_id).await?;
  let extract_job = jobs
    .iter()
    .filter(|j| j.kind == JobKind::Extract && j.status == JobStatus::Completed)
    .max_by_key(|j| j.completed_at)
    .ok_or_else(|| CoreError::not_found(format!("no completed extract job for document {document_id}")))?;

  let text = extract_job
    .result
    .as_ref()
    .and_then(|r| r.get("text"))
    .and_then(Value::as_str)
    .ok_or_else(|| CoreError::internal("extract job result has no text payload"))?
    .to_string();

  let source = extract_job.param_str("file_path").map(|p| {
    std::path::Path::new(p)
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| p.to_string())
  });
  Ok((text, source))
}

pub async fn run(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  let (text, source) = upstream_text(ctx, job.document_id).await?;
  if text.len() > MAX_INPUT_BYTES {
    return Err(CoreError::validation(format!(
      "extracted text is {} bytes, over the {} byte chunking cap",
      text.len(),
      MAX_INPUT_BYTES
    )));
  }

  let kind = job
    .param_str("chunk_type")
    .map(|raw| {
      raw
        .parse::<ChunkKind>()
        .map_err(|_| CoreError::validation(format!("unknown chunk_type '{raw}'")))
    })
    .transpose()?
    .unwrap_or(ChunkKind::FixedSize);

  let mut opts = ChunkOptions::from(&ctx.chunking);
  if let Some(size) = job.param_u64("chunk_size") {
    opts.chunk_size = size as usize;
  }
  if let Some(overlap) = job.param_u64("chunk_overlap") {
    opts.overlap = overlap as usize;
  }

  let fragments = chunker::chunk(&text, kind, &opts)?;
  if fragments.is_empty() {
    // The chunker never returns an empty set for non-empty text, but the
    // stage contract makes zero fragments terminal regardless.
    return Err(CoreError::validation("chunking produced no fragments"));
  }

  let mut chunks = Vec::with_capacity(fragments.len());
  for (sequence, fragment) in fragments.iter().enumerate() {
    let mut chunk = TextChunk::new(
      job.document_id,
      job.user_id,
      fragment.content.clone(),
      kind,
      sequence as u32,
      fragment.start,
      fragment.end,
    )?;
    if let Some(source) = &source {
      chunk
        .metadata
        .insert("source".into(), Value::String(source.clone()));
    }
    chunks.push(chunk);
  }
  ctx.chunks.save_batch(&chunks).await?;

  let chunk_ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();
  debug!(
    job_id = %job.id,
    document_id = %job.document_id,
    policy = %kind,
    chunks = chunk_ids.len(),
    "Chunk stage complete"
  );

  let average_chunk_size = chunks.iter().map(|c| c.content.chars().count()).sum::<usize>() / chunks.len();
  Ok(StageOutcome {
    result: Some(serde_json::json!({
      "chunk_count": chunk_ids.len(),
      "chunk_type": kind.as_str(),
      "average_chunk_size": average_chunk_size,
    })),
    metadata: None,
    event: Some(StageEvent {
      topic: bus::topics::CHUNKS_CREATED,
      payload: serde_json::to_value(ChunksCreated {
        document_id: job.document_id,
        user_id: job.user_id,
        chunk_count: chunk_ids.len(),
        chunk_ids,
      })
      .map_err(|e| CoreError::internal(e.to_string()))?,
    }),
  })
}
