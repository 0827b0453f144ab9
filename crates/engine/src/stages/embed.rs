//! Embed stage: vectorise chunk content and index the points.
//!
//! Each batch is all-or-nothing: points are upserted first, then
//! `embedding_id` is set per chunk; if a set fails, the points belonging
//! to still-unset chunks are deleted before the stage errors, so a chunk
//! with `embedding_id` always has its point in the index.

use std::collections::HashSet;

use embedding::EmbeddingMode;
use serde_json::Value;
use sift_core::{CoreError, EmbeddingRecord, ProcessingJob, ProcessingMetadata, TextChunk};
use tracing::{debug, warn};
use uuid::Uuid;
use vector::{Payload, Point};

use super::{StageEvent, StageOutcome};
use crate::EngineContext;
use crate::events::EmbeddingsGenerated;

/// Upper bound on explicitly requested chunk ids per job.
const MAX_REQUESTED_BATCH: usize = 100;
/// Internal batch size when embedding a whole document.
const BATCH_SIZE: usize = 100;

fn requested_chunk_ids(job: &ProcessingJob) -> Result<Option<Vec<Uuid>>, CoreError> {
  let Some(raw) = job.parameters.get("chunk_ids") else {
    return Ok(None);
  };
  let values = raw
    .as_array()
    .ok_or_else(|| CoreError::validation("chunk_ids must be an array"))?;

  let mut seen = HashSet::new();
  let mut ids = Vec::with_capacity(values.len());
  for value in values {
    let id = value
      .as_str()
      .and_then(|s| Uuid::parse_str(s).ok())
      .ok_or_else(|| CoreError::validation("chunk_ids entries must be UUID strings"))?;
    if seen.insert(id) {
      ids.push(id);
    }
  }
  if ids.len() > MAX_REQUESTED_BATCH {
    return Err(CoreError::validation(format!(
      "too many chunks in one embed job: {} (max {MAX_REQUESTED_BATCH})",
      ids.len()
    )));
  }
  Ok(Some(ids))
}

pub async fn run(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  let ids = match requested_chunk_ids(job)? {
    Some(ids) => ids,
    None => ctx
      .chunks
      .find_by_document(job.document_id)
      .await?
      .into_iter()
      .filter(|c| c.embedding_id.is_none())
      .map(|c| c.id)
      .collect(),
  };

  let mut embedding_ids: Vec<Uuid> = Vec::with_capacity(ids.len());
  for batch_ids in ids.chunks(BATCH_SIZE) {
    let batch: Vec<TextChunk> = ctx
      .chunks
      .find_by_ids(batch_ids)
      .await?
      .into_iter()
      .filter(|c| c.embedding_id.is_none())
      .collect();
    if batch.is_empty() {
      continue;
    }
    embedding_ids.extend(embed_batch(ctx, &batch).await?);
  }

  debug!(
    job_id = %job.id,
    document_id = %job.document_id,
    embeddings = embedding_ids.len(),
    "Embed stage complete"
  );

  let metadata = ProcessingMetadata {
    model_name: Some(ctx.embedder.model_id().to_string()),
    ..ProcessingMetadata::default()
  };

  Ok(StageOutcome {
    result: Some(serde_json::json!({
      "embedding_count": embedding_ids.len(),
      "dimension": ctx.embedder.dimensions(),
      "model": ctx.embedder.model_id(),
    })),
    metadata: Some(metadata),
    event: Some(StageEvent {
      topic: bus::topics::EMBEDDINGS_GENERATED,
      payload: serde_json::to_value(EmbeddingsGenerated {
        document_id: job.document_id,
        user_id: job.user_id,
        embedding_count: embedding_ids.len(),
        embedding_ids: embedding_ids.clone(),
      })
      .map_err(|e| CoreError::internal(e.to_string()))?,
    }),
  })
}

/// Embed one batch transactionally. Returns the new point ids.
async fn embed_batch(ctx: &EngineContext, batch: &[TextChunk]) -> Result<Vec<Uuid>, CoreError> {
  let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
  let embeddings = ctx.embedder.embed(&texts, EmbeddingMode::Document).await?;

  let mut points = Vec::with_capacity(batch.len());
  let mut pairs: Vec<(Uuid, Uuid)> = Vec::with_capacity(batch.len());
  for (chunk, embedding) in batch.iter().zip(embeddings) {
    let record = EmbeddingRecord::new(chunk.id, chunk.document_id, embedding.model.clone(), embedding.vector)?;
    let mut payload = Payload::from_chunk(chunk);
    if embedding.truncated {
      payload
        .user_metadata
        .insert("embedding_truncated".into(), Value::Bool(true));
    }
    pairs.push((chunk.id, record.id));
    points.push(Point::new(record.id, record.vector, payload));
  }

  ctx.vectors.upsert(points).await.map_err(CoreError::from)?;

  for (index, (chunk_id, point_id)) in pairs.iter().enumerate() {
    if let Err(err) = ctx.chunks.set_embedding_id(*chunk_id, *point_id).await {
      // Roll back the points of every chunk not yet marked, so marked
      // chunks keep a live point and unmarked ones retry cleanly.
      let unset: Vec<Uuid> = pairs[index..].iter().map(|(_, p)| *p).collect();
      warn!(
        chunk_id = %chunk_id,
        rolled_back = unset.len(),
        "Failed to set embedding id, rolling back batch remainder"
      );
      ctx.vectors.delete(&unset).await.map_err(CoreError::from)?;
      return Err(err.into());
    }
  }

  Ok(pairs.into_iter().map(|(_, point_id)| point_id).collect())
}
