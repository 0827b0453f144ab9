//! Job creation: uniqueness enforcement and per-kind parameter checks.

use serde_json::Value;
use sift_core::{CoreError, JobKind, ProcessingJob};
use store::JobStore;
use tracing::{debug, info};
use uuid::Uuid;

/// Request to create one processing job.
#[derive(Debug, Clone)]
pub struct NewJob {
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub kind: JobKind,
  pub priority: i32,
  pub parameters: serde_json::Map<String, Value>,
  pub max_retries: u32,
}

impl NewJob {
  pub fn new(document_id: Uuid, user_id: Uuid, kind: JobKind) -> Self {
    Self {
      document_id,
      user_id,
      kind,
      priority: 0,
      parameters: serde_json::Map::new(),
      max_retries: 3,
    }
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.parameters.insert(key.to_string(), value.into());
    self
  }
}

/// Validate the parameters a stage of this kind requires.
pub fn validate_parameters(kind: JobKind, parameters: &serde_json::Map<String, Value>) -> Result<(), CoreError> {
  let require_str = |key: &str| -> Result<(), CoreError> {
    match parameters.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
      Some(_) => Ok(()),
      None => Err(CoreError::validation(format!("{kind} job requires parameter '{key}'"))),
    }
  };

  match kind {
    JobKind::Extract => {
      require_str("file_path")?;
      require_str("file_type")?;
    }
    JobKind::Chunk => {
      require_str("chunk_type")?;
      if let Some(size) = parameters.get("chunk_size") {
        let valid = size.as_u64().is_some_and(|s| s > 0);
        if !valid {
          return Err(CoreError::validation("chunk_size must be a positive integer"));
        }
      }
    }
    JobKind::Embed => require_str("model_name")?,
    JobKind::Index => require_str("collection_name")?,
    JobKind::Dedup | JobKind::FullPipeline => {}
  }
  Ok(())
}

/// Create a job, rejecting a second non-terminal job for the same
/// `(document_id, kind)` with `conflict`.
pub async fn create_job(jobs: &dyn JobStore, request: NewJob) -> Result<ProcessingJob, CoreError> {
  validate_parameters(request.kind, &request.parameters)?;

  if let Some(existing) = jobs.find_active(request.document_id, request.kind).await? {
    debug!(
      document_id = %request.document_id,
      kind = %request.kind,
      existing_job = %existing.id,
      "Duplicate non-terminal job rejected"
    );
    return Err(
      CoreError::conflict(format!(
        "a non-terminal {} job already exists for document {}",
        request.kind, request.document_id
      ))
      .with_detail("existing_job_id", existing.id.to_string()),
    );
  }

  let job = ProcessingJob::new(request.document_id, request.user_id, request.kind)
    .with_priority(request.priority)
    .with_parameters(request.parameters)
    .with_max_retries(request.max_retries);
  jobs.save(&job).await?;

  info!(job_id = %job.id, document_id = %job.document_id, kind = %job.kind, "Job created");
  Ok(job)
}
