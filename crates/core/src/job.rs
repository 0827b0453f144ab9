//! Processing-job entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;

/// One stage of the document pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  Extract,
  Chunk,
  Embed,
  Dedup,
  Index,
  FullPipeline,
}

impl JobKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobKind::Extract => "extract",
      JobKind::Chunk => "chunk",
      JobKind::Embed => "embed",
      JobKind::Dedup => "dedup",
      JobKind::Index => "index",
      JobKind::FullPipeline => "full_pipeline",
    }
  }
}

impl std::fmt::Display for JobKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl std::str::FromStr for JobKind {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "extract" => Ok(JobKind::Extract),
      "chunk" => Ok(JobKind::Chunk),
      "embed" => Ok(JobKind::Embed),
      "dedup" => Ok(JobKind::Dedup),
      "index" => Ok(JobKind::Index),
      "full_pipeline" => Ok(JobKind::FullPipeline),
      _ => Err(()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Pending,
  Processing,
  Completed,
  Failed,
  Cancelled,
}

impl JobStatus {
  /// Completed and cancelled jobs are immutable.
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Cancelled)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Pending => "pending",
      JobStatus::Processing => "processing",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
      JobStatus::Cancelled => "cancelled",
    }
  }
}

impl std::fmt::Display for JobStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Result metadata recorded when a stage completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub processing_time_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model_version: Option<String>,
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub parameters: serde_json::Map<String, Value>,
}

/// A unit of staged work on one document.
///
/// State graph: `pending -> processing -> {completed | failed}`, with
/// `processing -> pending` on a retryable failure (bounded by `max_retries`)
/// and any live state `-> cancelled`. Terminal states are immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
  pub id: Uuid,
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub kind: JobKind,
  pub status: JobStatus,
  pub priority: i32,
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub parameters: serde_json::Map<String, Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub metadata: Option<ProcessingMetadata>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<CoreError>,
  pub retry_count: u32,
  pub max_retries: u32,
  /// Earliest instant a retried job may be claimed again (backoff gate).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub not_before: Option<DateTime<Utc>>,
  /// Worker currently holding the job, set by the claim CAS.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub claimed_by: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
  pub fn new(document_id: Uuid, user_id: Uuid, kind: JobKind) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      document_id,
      user_id,
      kind,
      status: JobStatus::Pending,
      priority: 0,
      parameters: serde_json::Map::new(),
      metadata: None,
      result: None,
      error: None,
      retry_count: 0,
      max_retries: 3,
      not_before: None,
      claimed_by: None,
      created_at: now,
      updated_at: now,
      started_at: None,
      completed_at: None,
    }
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_parameters(mut self, parameters: serde_json::Map<String, Value>) -> Self {
    self.parameters = parameters;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Claim the job for a worker: `pending -> processing`.
  pub fn start(&mut self, worker_id: &str) -> Result<(), CoreError> {
    if self.status != JobStatus::Pending {
      return Err(CoreError::conflict(format!(
        "cannot start job {} in status {}",
        self.id, self.status
      )));
    }
    let now = Utc::now();
    self.status = JobStatus::Processing;
    self.claimed_by = Some(worker_id.to_string());
    self.started_at = Some(now);
    self.updated_at = now;
    Ok(())
  }

  /// `processing -> completed`, recording result payload and metadata.
  pub fn complete(&mut self, result: Option<Value>, metadata: Option<ProcessingMetadata>) -> Result<(), CoreError> {
    if self.status != JobStatus::Processing {
      return Err(CoreError::conflict(format!(
        "cannot complete job {} in status {}",
        self.id, self.status
      )));
    }
    let now = Utc::now();
    self.status = JobStatus::Completed;
    self.result = result;
    self.metadata = metadata;
    self.error = None;
    self.completed_at = Some(now);
    self.updated_at = now;
    Ok(())
  }

  /// Retryable failure: back to `pending` with an incremented retry count
  /// and a backoff gate. Fails with `conflict` when the budget is spent.
  pub fn fail_with_retry(&mut self, error: CoreError, not_before: DateTime<Utc>) -> Result<(), CoreError> {
    if !matches!(self.status, JobStatus::Processing | JobStatus::Pending) {
      return Err(CoreError::conflict(format!(
        "cannot retry job {} in status {}",
        self.id, self.status
      )));
    }
    if self.retry_count >= self.max_retries {
      return Err(CoreError::conflict(format!(
        "job {} has no retries left ({}/{})",
        self.id, self.retry_count, self.max_retries
      )));
    }
    self.retry_count += 1;
    self.status = JobStatus::Pending;
    self.error = Some(error);
    self.not_before = Some(not_before);
    self.claimed_by = None;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Permanent failure: `-> failed`. The retry count is left as-is; what
  /// makes the failure permanent is the non-retryable error it carries.
  pub fn fail_permanently(&mut self, error: CoreError) -> Result<(), CoreError> {
    if self.status.is_terminal() {
      return Err(CoreError::conflict(format!(
        "cannot fail job {} in status {}",
        self.id, self.status
      )));
    }
    self.status = JobStatus::Failed;
    self.error = Some(error);
    self.claimed_by = None;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Re-queue a failed job: `failed -> pending`, spending one retry.
  pub fn requeue(&mut self) -> Result<(), CoreError> {
    if self.status != JobStatus::Failed {
      return Err(CoreError::conflict(format!(
        "cannot requeue job {} in status {}",
        self.id, self.status
      )));
    }
    if !self.can_retry() {
      return Err(CoreError::conflict(format!(
        "job {} is not retryable ({}/{} retries used)",
        self.id, self.retry_count, self.max_retries
      )));
    }
    self.retry_count += 1;
    self.status = JobStatus::Pending;
    self.not_before = None;
    self.claimed_by = None;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Cancel from any live state.
  pub fn cancel(&mut self) -> Result<(), CoreError> {
    if self.status.is_terminal() {
      return Err(CoreError::conflict(format!(
        "cannot cancel job {} in status {}",
        self.id, self.status
      )));
    }
    self.status = JobStatus::Cancelled;
    self.claimed_by = None;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Whether another attempt is allowed: budget remaining and the last
  /// error (if any) retryable.
  pub fn can_retry(&self) -> bool {
    self.retry_count < self.max_retries && self.error.as_ref().is_none_or(CoreError::is_retryable)
  }

  /// Whether the backoff gate allows claiming at `now`.
  pub fn claimable_at(&self, now: DateTime<Utc>) -> bool {
    self.status == JobStatus::Pending && self.not_before.is_none_or(|t| t <= now)
  }

  /// Wall-clock duration of the last processing attempt, if started.
  pub fn processing_duration(&self) -> Option<chrono::Duration> {
    let started = self.started_at?;
    let end = self.completed_at.unwrap_or_else(Utc::now);
    Some(end - started)
  }

  pub fn param_str(&self, key: &str) -> Option<&str> {
    self.parameters.get(key).and_then(Value::as_str)
  }

  pub fn param_u64(&self, key: &str) -> Option<u64> {
    self.parameters.get(key).and_then(Value::as_u64)
  }
}
