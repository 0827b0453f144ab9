//! Job persistence: trait contract plus the in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sift_core::{JobKind, JobStatus, ProcessingJob};
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::{Result, StoreError};

/// Persistence contract for processing jobs.
///
/// `save` must linearise concurrent writers for the same job (optimistic
/// check on `updated_at`); `claim_next` must be an atomic
/// read-modify-write so two workers can never claim the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
  /// Insert or update. Rejects with `Conflict` when the stored row has a
  /// newer `updated_at` than the one this job was read at, and when a
  /// terminal row would be mutated.
  async fn save(&self, job: &ProcessingJob) -> Result<()>;

  async fn find_by_id(&self, id: Uuid) -> Result<Option<ProcessingJob>>;

  async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>>;

  /// Pending jobs whose backoff gate has passed, ordered by
  /// `(priority desc, created_at asc)` when `prefer_higher_priority`,
  /// else `created_at asc` alone.
  async fn find_pending(&self, limit: usize, prefer_higher_priority: bool) -> Result<Vec<ProcessingJob>>;

  /// Failed jobs with retry budget remaining.
  async fn find_retryable_failures(&self) -> Result<Vec<ProcessingJob>>;

  /// Direct status transition; terminal rows are immutable.
  async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<()>;

  async fn count_by_status(&self) -> Result<HashMap<JobStatus, usize>>;

  async fn find_by_status(&self, status: JobStatus) -> Result<Vec<ProcessingJob>>;

  /// The single non-terminal job for `(document_id, kind)`, if any.
  async fn find_active(&self, document_id: Uuid, kind: JobKind) -> Result<Option<ProcessingJob>>;

  /// Atomically claim the best claimable pending job for `worker_id`:
  /// compare-and-set `pending -> processing`.
  async fn claim_next(&self, worker_id: &str) -> Result<Option<ProcessingJob>>;
}

/// In-memory job store.
///
/// A single `RwLock` over the job map keeps the claim path trivially
/// atomic; the pending ordering is computed on read, which matches the
/// `(status, priority desc, created_at asc)` index contract.
#[derive(Default)]
pub struct MemoryJobStore {
  jobs: Arc<RwLock<HashMap<Uuid, ProcessingJob>>>,
}

impl MemoryJobStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn pending_order(a: &ProcessingJob, b: &ProcessingJob, prefer_higher_priority: bool) -> std::cmp::Ordering {
    if prefer_higher_priority {
      b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
    } else {
      a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
    }
  }
}

#[async_trait]
impl JobStore for MemoryJobStore {
  async fn save(&self, job: &ProcessingJob) -> Result<()> {
    let mut jobs = self.jobs.write().await;
    if let Some(existing) = jobs.get(&job.id) {
      if existing.is_terminal() && existing.status != job.status {
        return Err(StoreError::Conflict(format!(
          "job {} is terminal ({}) and cannot change state",
          job.id, existing.status
        )));
      }
      if existing.updated_at > job.updated_at {
        return Err(StoreError::Conflict(format!(
          "stale write for job {}: stored version is newer",
          job.id
        )));
      }
    }
    let mut stored = job.clone();
    stored.updated_at = Utc::now();
    trace!(job_id = %stored.id, status = %stored.status, "Job saved");
    jobs.insert(stored.id, stored);
    Ok(())
  }

  async fn find_by_id(&self, id: Uuid) -> Result<Option<ProcessingJob>> {
    Ok(self.jobs.read().await.get(&id).cloned())
  }

  async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>> {
    let jobs = self.jobs.read().await;
    let mut found: Vec<ProcessingJob> = jobs.values().filter(|j| j.document_id == document_id).cloned().collect();
    found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(found)
  }

  async fn find_pending(&self, limit: usize, prefer_higher_priority: bool) -> Result<Vec<ProcessingJob>> {
    let now = Utc::now();
    let jobs = self.jobs.read().await;
    let mut pending: Vec<ProcessingJob> = jobs.values().filter(|j| j.claimable_at(now)).cloned().collect();
    pending.sort_by(|a, b| Self::pending_order(a, b, prefer_higher_priority));
    pending.truncate(limit);
    Ok(pending)
  }

  async fn find_retryable_failures(&self) -> Result<Vec<ProcessingJob>> {
    let jobs = self.jobs.read().await;
    let mut failed: Vec<ProcessingJob> = jobs
      .values()
      .filter(|j| j.status == JobStatus::Failed && j.can_retry())
      .cloned()
      .collect();
    failed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
    Ok(failed)
  }

  async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
    let mut jobs = self.jobs.write().await;
    let job = jobs
      .get_mut(&id)
      .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
    if job.is_terminal() {
      return Err(StoreError::Conflict(format!(
        "job {id} is terminal ({}) and cannot change state",
        job.status
      )));
    }
    job.status = status;
    job.updated_at = Utc::now();
    Ok(())
  }

  async fn count_by_status(&self) -> Result<HashMap<JobStatus, usize>> {
    let jobs = self.jobs.read().await;
    let mut counts = HashMap::new();
    for job in jobs.values() {
      *counts.entry(job.status).or_insert(0) += 1;
    }
    Ok(counts)
  }

  async fn find_by_status(&self, status: JobStatus) -> Result<Vec<ProcessingJob>> {
    let jobs = self.jobs.read().await;
    let mut found: Vec<ProcessingJob> = jobs.values().filter(|j| j.status == status).cloned().collect();
    found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
    Ok(found)
  }

  async fn find_active(&self, document_id: Uuid, kind: JobKind) -> Result<Option<ProcessingJob>> {
    let jobs = self.jobs.read().await;
    Ok(
      jobs
        .values()
        .find(|j| j.document_id == document_id && j.kind == kind && !j.is_terminal())
        .cloned(),
    )
  }

  async fn claim_next(&self, worker_id: &str) -> Result<Option<ProcessingJob>> {
    let now = Utc::now();
    let mut jobs = self.jobs.write().await;

    let best = jobs
      .values()
      .filter(|j| j.claimable_at(now))
      .min_by(|a, b| Self::pending_order(a, b, true))
      .map(|j| j.id);

    let Some(id) = best else {
      return Ok(None);
    };

    let job = jobs.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
    job.start(worker_id)?;
    job.updated_at = Utc::now();
    trace!(job_id = %id, worker_id, kind = %job.kind, "Job claimed");
    Ok(Some(job.clone()))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use sift_core::CoreError;

  use super::*;

  fn job(kind: JobKind, priority: i32) -> ProcessingJob {
    ProcessingJob::new(Uuid::new_v4(), Uuid::new_v4(), kind).with_priority(priority)
  }

  #[tokio::test]
  async fn test_save_and_find() {
    let store = MemoryJobStore::new();
    let j = job(JobKind::Extract, 0);
    store.save(&j).await.unwrap();

    let found = store.find_by_id(j.id).await.unwrap().unwrap();
    assert_eq!(found.id, j.id);
    assert_eq!(found.kind, JobKind::Extract);
  }

  #[tokio::test]
  async fn test_stale_save_rejected() {
    let store = MemoryJobStore::new();
    let j = job(JobKind::Chunk, 0);
    store.save(&j).await.unwrap();

    // A concurrent writer saved a newer version.
    let fresh = store.find_by_id(j.id).await.unwrap().unwrap();
    store.save(&fresh).await.unwrap();

    // The original in-memory copy is now stale.
    let err = store.save(&j).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
  }

  #[tokio::test]
  async fn test_terminal_rows_immutable() {
    let store = MemoryJobStore::new();
    let mut j = job(JobKind::Embed, 0);
    j.start("w").unwrap();
    j.complete(None, None).unwrap();
    store.save(&j).await.unwrap();

    let err = store.update_status(j.id, JobStatus::Pending).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
  }

  #[tokio::test]
  async fn test_pending_ordering_prefers_priority_then_age() {
    let store = MemoryJobStore::new();
    let low_old = job(JobKind::Extract, 1);
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let high_new = job(JobKind::Extract, 9);
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let high_newer = job(JobKind::Extract, 9);

    for j in [&low_old, &high_new, &high_newer] {
      store.save(j).await.unwrap();
    }

    let pending = store.find_pending(10, true).await.unwrap();
    let ids: Vec<Uuid> = pending.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![high_new.id, high_newer.id, low_old.id]);
  }

  #[tokio::test]
  async fn test_backoff_gate_hides_jobs() {
    let store = MemoryJobStore::new();
    let mut j = job(JobKind::Embed, 0);
    j.not_before = Some(Utc::now() + chrono::Duration::seconds(60));
    store.save(&j).await.unwrap();

    assert!(store.find_pending(10, true).await.unwrap().is_empty());
    assert!(store.claim_next("w").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_claim_is_exclusive() {
    let store = Arc::new(MemoryJobStore::new());
    let j = job(JobKind::Extract, 0);
    store.save(&j).await.unwrap();

    let mut claimed = Vec::new();
    for worker in ["w0", "w1", "w2"] {
      if let Some(job) = store.claim_next(worker).await.unwrap() {
        claimed.push((worker, job.id));
      }
    }
    assert_eq!(claimed.len(), 1, "only one worker may win the claim");

    let stored = store.find_by_id(j.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(stored.claimed_by.as_deref(), Some(claimed[0].0));
  }

  #[tokio::test]
  async fn test_concurrent_claims_never_share_a_job() {
    let store = Arc::new(MemoryJobStore::new());
    for _ in 0..10 {
      store.save(&job(JobKind::Extract, 0)).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..10 {
      let store = store.clone();
      handles.push(tokio::spawn(async move {
        store.claim_next(&format!("w{w}")).await.unwrap().map(|j| j.id)
      }));
    }

    let mut seen = std::collections::HashSet::new();
    for handle in handles {
      if let Some(id) = handle.await.unwrap() {
        assert!(seen.insert(id), "job {id} claimed twice");
      }
    }
    assert_eq!(seen.len(), 10);
  }

  #[tokio::test]
  async fn test_find_active_sees_only_non_terminal() {
    let store = MemoryJobStore::new();
    let document_id = Uuid::new_v4();

    let mut done = ProcessingJob::new(document_id, Uuid::new_v4(), JobKind::Extract);
    done.start("w").unwrap();
    done.complete(None, None).unwrap();
    store.save(&done).await.unwrap();
    assert!(store.find_active(document_id, JobKind::Extract).await.unwrap().is_none());

    let live = ProcessingJob::new(document_id, Uuid::new_v4(), JobKind::Extract);
    store.save(&live).await.unwrap();
    let active = store.find_active(document_id, JobKind::Extract).await.unwrap().unwrap();
    assert_eq!(active.id, live.id);
  }

  #[tokio::test]
  async fn test_count_by_status_and_retryable_failures() {
    let store = MemoryJobStore::new();
    let pending = job(JobKind::Extract, 0);
    store.save(&pending).await.unwrap();

    let mut failed = job(JobKind::Embed, 0);
    failed.start("w").unwrap();
    failed
      .fail_with_retry(CoreError::external("503"), Utc::now())
      .unwrap();
    failed.status = JobStatus::Failed;
    store.save(&failed).await.unwrap();

    let counts = store.count_by_status().await.unwrap();
    assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
    assert_eq!(counts.get(&JobStatus::Failed), Some(&1));

    let retryable = store.find_retryable_failures().await.unwrap();
    assert_eq!(retryable.len(), 1);
    assert_eq!(retryable[0].id, failed.id);
  }
}
