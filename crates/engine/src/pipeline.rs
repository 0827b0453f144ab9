//! Pipeline coordination: each stage-completion event creates the next
//! stage's job. Duplicate creations (at-least-once delivery) collapse on
//! the non-terminal-uniqueness rule.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{EventHandler, Message};
use serde_json::Value;
use sift_core::{CoreError, ErrorKind, JobKind};
use tracing::{debug, info};

use crate::EngineContext;
use crate::create::{NewJob, create_job};
use crate::events::{ChunksCreated, DocumentUploaded, EmbeddingsGenerated, TextExtracted};

pub struct PipelineCoordinator {
  ctx: Arc<EngineContext>,
}

impl PipelineCoordinator {
  pub fn new(ctx: Arc<EngineContext>) -> Self {
    Self { ctx }
  }

  async fn create_next(&self, request: NewJob) -> Result<(), CoreError> {
    let kind = request.kind;
    let document_id = request.document_id;
    match create_job(self.ctx.jobs.as_ref(), request).await {
      Ok(job) => {
        info!(job_id = %job.id, document_id = %document_id, kind = %kind, "Pipeline stage queued");
        Ok(())
      }
      // Redelivered event: the stage job already exists.
      Err(err) if err.kind == ErrorKind::Conflict => {
        debug!(document_id = %document_id, kind = %kind, "Stage job already queued");
        Ok(())
      }
      Err(err) => Err(err),
    }
  }
}

#[async_trait]
impl EventHandler for PipelineCoordinator {
  async fn handle(&self, message: &Message) -> Result<(), CoreError> {
    match message.topic.as_str() {
      bus::topics::DOCUMENT_UPLOADED => {
        let event: DocumentUploaded = parse(&message.envelope.data)?;
        let request = NewJob::new(event.document_id, event.user_id, JobKind::Extract)
          .with_param("file_path", event.file_path)
          .with_param("file_type", event.file_type);
        self.create_next(request).await
      }
      bus::topics::TEXT_EXTRACTED => {
        let event: TextExtracted = parse(&message.envelope.data)?;
        let request = NewJob::new(event.document_id, event.user_id, JobKind::Chunk)
          .with_param("chunk_type", self.ctx.default_chunk_type.as_str());
        self.create_next(request).await
      }
      bus::topics::CHUNKS_CREATED => {
        let event: ChunksCreated = parse(&message.envelope.data)?;
        let request = NewJob::new(event.document_id, event.user_id, JobKind::Embed)
          .with_param("model_name", self.ctx.embedder.model_id());
        self.create_next(request).await
      }
      bus::topics::EMBEDDINGS_GENERATED => {
        let event: EmbeddingsGenerated = parse(&message.envelope.data)?;
        let request = NewJob::new(event.document_id, event.user_id, JobKind::Dedup);
        self.create_next(request).await
      }
      // Terminal topics need no successor stage.
      _ => Ok(()),
    }
  }
}

fn parse<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, CoreError> {
  serde_json::from_value(data.clone())
    .map_err(|e| CoreError::validation(format!("malformed event payload: {e}")))
}
