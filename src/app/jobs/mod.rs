pub mod database_queue_driver;
pub mod queue_worker;
pub mod send_birthday_message_job;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::app::models::jobs::JobStatus;
use crate::app::models::scheduled_send::ScheduledSend;

pub const QUEUE_BIRTHDAY: &str = "birthday";

/// Context handed to a job for one execution attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Queue job id; for delivery jobs this is the scheduled send's
    /// idempotency key.
    pub job_id: String,
    /// 1-based attempt number of this execution.
    pub attempt: u32,
    pub max_attempts: u32,
    pub trace_id: Option<String>,
}

/// Base trait all queue jobs implement.
///
/// Returning `Ok` acknowledges the job and removes it from the queue, even
/// when the underlying work was finalised as a failure. Returning `Err`
/// signals the queue to retry with backoff until the attempt budget runs out.
#[async_trait]
pub trait Job: Send + Sync {
    fn job_name(&self) -> &'static str;

    async fn handle(&self, ctx: &JobContext) -> Result<()>;

    /// Called once the queue gives up on the job.
    async fn failed(&self, ctx: &JobContext, error: &anyhow::Error) {
        tracing::error!(
            job_id = %ctx.job_id,
            "Job {} failed permanently: {}",
            self.job_name(),
            error
        );
    }
}

/// Builds job instances from a queued payload. Factories carry the process
/// dependencies (pool, clients) that the serialized payload cannot.
pub trait JobFactory: Send + Sync {
    fn create_job(&self, payload: &serde_json::Value) -> Result<Box<dyn Job>>;
}

/// Queue job record as seen by drivers and the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: String,
    pub job_name: String,
    pub queue_name: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobMetadata {
    pub fn new(
        id: String,
        job_name: String,
        queue_name: String,
        payload: serde_json::Value,
        max_attempts: u32,
        available_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_name,
            queue_name,
            status: JobStatus::Pending,
            payload,
            attempts: 0,
            max_attempts,
            available_at,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Retry delay before the next attempt: 2s, 4s, 8s, 16s, 32s.
pub fn backoff_delay(attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(4);
    Duration::from_secs(2u64 << exponent)
}

/// Queue driver contract: idempotent enqueue by unique job id, delayed
/// availability, at-least-once claim, bounded retries with backoff, removal
/// of completed jobs and retention of failed ones.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Enqueue a job. Returns false when a job with the same id is already
    /// queued or in flight; the enqueue is then a no-op.
    async fn push(&self, metadata: JobMetadata) -> Result<bool>;

    /// Claim the next available job, moving it to processing and counting
    /// the attempt.
    async fn pop(&self, queue_name: &str) -> Result<Option<JobMetadata>>;

    /// Whether a queued or in-flight job with this id exists.
    async fn exists(&self, job_id: &str) -> Result<bool>;

    /// Remove a job that has not been claimed yet. A job already processing
    /// is left alone and the removal is a no-op.
    async fn remove(&self, job_id: &str) -> Result<()>;

    /// Acknowledge a finished job and drop it from the queue.
    async fn complete(&self, job_id: &str) -> Result<()>;

    /// Put a claimed job back with a delay for the next attempt.
    async fn release(&self, metadata: &JobMetadata, delay: Duration, error: &str) -> Result<()>;

    /// Park a claimed job as failed; kept for inspection until purged.
    async fn fail(&self, job_id: &str, error: &str) -> Result<()>;

    /// Return jobs stuck in processing longer than `older_than` to the
    /// pending pool. Covers workers that died mid-flight.
    async fn release_stuck(&self, older_than: Duration) -> Result<u64>;

    /// Delete failed jobs older than the retention window.
    async fn purge_failed(&self, older_than: Duration) -> Result<u64>;

    async fn size(&self, queue_name: &str) -> Result<u64>;

    async fn failed_jobs(&self, limit: Option<u32>) -> Result<Vec<JobMetadata>>;

    fn driver_name(&self) -> &'static str;
}

/// Enqueue the delivery job for a scheduled send, keyed by its idempotency
/// key. Returns false when an equivalent job is already queued.
pub async fn enqueue_delivery(
    driver: &dyn QueueDriver,
    record: &ScheduledSend,
    max_attempts: u32,
    trace_id: Option<&str>,
) -> Result<bool> {
    let payload = serde_json::json!({
        "user_id": record.user_id.to_string(),
        "scheduled_for": record.scheduled_for,
        "trace_id": trace_id,
    });

    let metadata = JobMetadata::new(
        record.idempotency_key.clone(),
        send_birthday_message_job::JOB_NAME.to_string(),
        QUEUE_BIRTHDAY.to_string(),
        payload,
        max_attempts,
        Utc::now(),
    );

    driver.push(metadata).await
}

/// In-memory queue driver for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryQueueDriver {
    jobs: Arc<RwLock<HashMap<String, JobMetadata>>>,
}

impl MemoryQueueDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueDriver for MemoryQueueDriver {
    async fn push(&self, metadata: JobMetadata) -> Result<bool> {
        let mut jobs = self.jobs.write().await;

        // A parked failed job is revived by a fresh push; anything else
        // already queued or in flight blocks the enqueue.
        if let Some(existing) = jobs.get(&metadata.id) {
            if !matches!(existing.status, JobStatus::Failed) {
                return Ok(false);
            }
        }

        jobs.insert(metadata.id.clone(), metadata);
        Ok(true)
    }

    async fn pop(&self, queue_name: &str) -> Result<Option<JobMetadata>> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();

        let candidate = jobs
            .values()
            .filter(|job| {
                job.queue_name == queue_name
                    && matches!(job.status, JobStatus::Pending | JobStatus::Retrying)
                    && job.available_at <= now
            })
            .min_by_key(|job| job.available_at)
            .map(|job| job.id.clone());

        if let Some(id) = candidate {
            let job = jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.updated_at = now;
            return Ok(Some(job.clone()));
        }

        Ok(None)
    }

    async fn exists(&self, job_id: &str) -> Result<bool> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(job_id)
            .map(|job| {
                matches!(
                    job.status,
                    JobStatus::Pending | JobStatus::Retrying | JobStatus::Processing
                )
            })
            .unwrap_or(false))
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get(job_id) {
            if !matches!(job.status, JobStatus::Processing) {
                jobs.remove(job_id);
            }
        }
        Ok(())
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(job_id);
        Ok(())
    }

    async fn release(&self, metadata: &JobMetadata, delay: Duration, error: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&metadata.id) {
            job.status = JobStatus::Retrying;
            job.available_at = Utc::now() + chrono::Duration::from_std(delay)?;
            job.error_message = Some(error.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.error_message = Some(error.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn release_stuck(&self, older_than: Duration) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        let mut released = 0;

        for job in jobs.values_mut() {
            if matches!(job.status, JobStatus::Processing) && job.updated_at < cutoff {
                job.status = JobStatus::Pending;
                job.available_at = Utc::now();
                released += 1;
            }
        }

        Ok(released)
    }

    async fn purge_failed(&self, older_than: Duration) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        let before = jobs.len();

        jobs.retain(|_, job| {
            !(matches!(job.status, JobStatus::Failed) && job.updated_at < cutoff)
        });

        Ok((before - jobs.len()) as u64)
    }

    async fn size(&self, queue_name: &str) -> Result<u64> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| {
                job.queue_name == queue_name
                    && matches!(job.status, JobStatus::Pending | JobStatus::Retrying)
            })
            .count() as u64)
    }

    async fn failed_jobs(&self, limit: Option<u32>) -> Result<Vec<JobMetadata>> {
        let jobs = self.jobs.read().await;
        let limit = limit.unwrap_or(100) as usize;
        Ok(jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Failed))
            .take(limit)
            .cloned()
            .collect())
    }

    fn driver_name(&self) -> &'static str {
        "memory"
    }
}
