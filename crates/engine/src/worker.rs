//! The bounded worker pool driving claimed jobs through their stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::{EventBus, EventEnvelope};
use chrono::Utc;
use sift_core::{CoreError, ErrorKind, ProcessingJob};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::EngineContext;
use crate::backoff::RetryPolicy;
use crate::events::ProcessingFailed;
use crate::stages::{StageEvent, run_stage};

pub struct WorkerPool {
  ctx: Arc<EngineContext>,
  policy: RetryPolicy,
}

impl WorkerPool {
  pub fn new(ctx: Arc<EngineContext>) -> Self {
    let policy = RetryPolicy::from(&ctx.engine);
    Self { ctx, policy }
  }

  /// Run `max_concurrent_processing` independent claim loops until
  /// `cancel` fires, then finish in-flight jobs within the grace period.
  pub async fn run(&self, cancel: CancellationToken) {
    let worker_count = self.ctx.engine.max_concurrent_processing;
    info!(workers = worker_count, "Worker pool starting");

    let mut set = JoinSet::new();
    for index in 0..worker_count {
      let ctx = self.ctx.clone();
      let policy = self.policy.clone();
      let cancel = cancel.clone();
      let worker_id = format!("worker-{index}");
      set.spawn(async move { worker_loop(ctx, policy, worker_id, cancel).await });
    }

    cancel.cancelled().await;

    // Cooperative shutdown: workers stop claiming immediately; give
    // in-flight jobs the grace period, then abandon the rest.
    let grace = Duration::from_secs(self.ctx.engine.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
      while set.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
      warn!(grace_secs = grace.as_secs(), "Shutdown grace elapsed, abandoning in-flight jobs");
      set.abort_all();
      while set.join_next().await.is_some() {}
    }

    self.sweep_abandoned().await;
    info!("Worker pool stopped");
  }

  /// Jobs still marked processing after the pool stopped were abandoned
  /// mid-flight: push them back through the retry path so the next start
  /// picks them up.
  async fn sweep_abandoned(&self) {
    let stuck = match self.ctx.jobs.find_by_status(sift_core::JobStatus::Processing).await {
      Ok(jobs) => jobs,
      Err(e) => {
        error!(error = %e, "Cannot inspect jobs during shutdown sweep");
        return;
      }
    };
    for mut job in stuck {
      let err = CoreError::external("worker shut down before the job finished").with_detail("reason", "shutdown");
      let outcome = if job.can_retry() {
        job.fail_with_retry(err, Utc::now())
      } else {
        job.fail_permanently(err)
      };
      if outcome.is_ok() {
        if let Err(e) = self.ctx.jobs.save(&job).await {
          error!(job_id = %job.id, error = %e, "Cannot persist shutdown state");
        }
      }
    }
  }
}

async fn worker_loop(ctx: Arc<EngineContext>, policy: RetryPolicy, worker_id: String, cancel: CancellationToken) {
  let poll_interval = Duration::from_millis(ctx.engine.poll_interval_ms);
  debug!(worker_id, "Worker loop starting");

  loop {
    if cancel.is_cancelled() {
      break;
    }
    match ctx.jobs.claim_next(&worker_id).await {
      Ok(Some(job)) => execute_job(&ctx, &policy, job).await,
      Ok(None) => {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(poll_interval) => {}
        }
      }
      Err(e) => {
        warn!(worker_id, error = %e, "Claim failed");
        tokio::time::sleep(poll_interval).await;
      }
    }
  }
  debug!(worker_id, "Worker loop stopped");
}

async fn execute_job(ctx: &EngineContext, policy: &RetryPolicy, mut job: ProcessingJob) {
  let started = Instant::now();
  let deadline = Duration::from_secs(ctx.engine.job_deadline_secs);

  let result = match tokio::time::timeout(deadline, run_stage(ctx, &job)).await {
    Ok(result) => result,
    Err(_) => Err(CoreError::timeout(format!(
      "job exceeded its {}s deadline",
      deadline.as_secs()
    ))),
  };

  match result {
    Ok(mut outcome) => {
      let mut metadata = outcome.metadata.take().unwrap_or_default();
      metadata.processing_time_ms = Some(started.elapsed().as_millis() as u64);

      if let Err(e) = job.complete(outcome.result.take(), Some(metadata)) {
        error!(job_id = %job.id, error = %e, "Cannot mark job completed");
        return;
      }
      if let Err(e) = ctx.jobs.save(&job).await {
        error!(job_id = %job.id, error = %e, "Cannot persist completed job");
        return;
      }
      debug!(job_id = %job.id, kind = %job.kind, elapsed_ms = started.elapsed().as_millis(), "Job completed");

      if let Some(event) = outcome.event {
        publish_stage_event(ctx, &job, event).await;
      }
    }
    Err(err) => handle_failure(ctx, policy, &mut job, err).await,
  }
}

async fn publish_stage_event(ctx: &EngineContext, job: &ProcessingJob, event: StageEvent) {
  let event_type = event.topic.replace('.', "_");
  let envelope = EventEnvelope::new(event_type, event.payload).with_correlation_id(job.id.to_string());
  let key = job.document_id.to_string();
  if let Err(e) = ctx.bus.publish(event.topic, Some(&key), envelope).await {
    // Stage state is already persisted; a lost event is repairable by a
    // manual re-run, not by failing the job.
    error!(job_id = %job.id, topic = event.topic, error = %e, "Cannot publish stage event");
  }
}

/// Classify a stage failure and either re-queue with backoff or fail the
/// job permanently and announce it.
pub(crate) async fn handle_failure(ctx: &EngineContext, policy: &RetryPolicy, job: &mut ProcessingJob, err: CoreError) {
  // Internal faults get a single retry regardless of the job's budget.
  let effective_max = if err.kind == ErrorKind::Internal {
    job.max_retries.min(1)
  } else {
    job.max_retries
  };

  if err.is_retryable() && job.retry_count < effective_max {
    let delay = policy.delay_for_attempt(job.retry_count);
    let gate = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
    warn!(
      job_id = %job.id,
      kind = %job.kind,
      retry = job.retry_count + 1,
      max = effective_max,
      backoff_ms = delay.as_millis(),
      error = %err,
      "Job failed, scheduling retry"
    );
    if job.fail_with_retry(err, gate).is_ok() {
      if let Err(e) = ctx.jobs.save(job).await {
        error!(job_id = %job.id, error = %e, "Cannot persist retry state");
      }
    }
    return;
  }

  error!(job_id = %job.id, kind = %job.kind, error = %err, "Job failed permanently");
  let payload = ProcessingFailed {
    job_id: job.id,
    document_id: job.document_id,
    kind: job.kind.as_str().to_string(),
    error_kind: err.kind.as_str().to_string(),
    error_message: err.message.clone(),
  };
  if job.fail_permanently(err).is_ok() {
    if let Err(e) = ctx.jobs.save(job).await {
      error!(job_id = %job.id, error = %e, "Cannot persist failed job");
    }
  }

  match serde_json::to_value(&payload) {
    Ok(value) => {
      let envelope = EventEnvelope::new("processing_failed", value).with_correlation_id(job.id.to_string());
      let key = job.document_id.to_string();
      if let Err(e) = ctx.bus.publish(bus::topics::PROCESSING_FAILED, Some(&key), envelope).await {
        error!(job_id = %job.id, error = %e, "Cannot publish failure event");
      }
    }
    Err(e) => error!(job_id = %job.id, error = %e, "Cannot serialize failure event"),
  }
}
