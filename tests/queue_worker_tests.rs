use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wisher::app::jobs::queue_worker::{QueueWorker, WorkerConfig};
use wisher::app::jobs::{Job, JobContext, JobFactory, JobMetadata, MemoryQueueDriver, QueueDriver};
use wisher::app::models::jobs::JobStatus;

struct RecordingJob {
    runs: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl Job for RecordingJob {
    fn job_name(&self) -> &'static str {
        "RecordingJob"
    }

    async fn handle(&self, _ctx: &JobContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(anyhow::anyhow!("synthetic failure"))
        } else {
            Ok(())
        }
    }
}

struct RecordingFactory {
    runs: Arc<AtomicUsize>,
    fail: bool,
}

impl JobFactory for RecordingFactory {
    fn create_job(&self, _payload: &serde_json::Value) -> Result<Box<dyn Job>> {
        Ok(Box::new(RecordingJob {
            runs: self.runs.clone(),
            fail: self.fail,
        }))
    }
}

fn metadata(id: &str, max_attempts: u32) -> JobMetadata {
    JobMetadata::new(
        id.to_string(),
        "RecordingJob".to_string(),
        "test".to_string(),
        serde_json::json!({}),
        max_attempts,
        Utc::now(),
    )
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        queue_name: "test".to_string(),
        concurrency: 2,
        job_timeout: Duration::from_secs(5),
        sleep_duration: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn successful_jobs_are_acknowledged_and_removed() {
    let driver: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut worker = QueueWorker::new(worker_config(), driver.clone());
    worker
        .register_job("RecordingJob", RecordingFactory { runs: runs.clone(), fail: false })
        .await;

    driver.push(metadata("job-1", 5)).await.unwrap();
    worker.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop(Duration::from_secs(1)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!driver.exists("job-1").await.unwrap());
    assert!(driver.failed_jobs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn jobs_out_of_attempts_are_parked_as_failed() {
    let driver: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut worker = QueueWorker::new(worker_config(), driver.clone());
    worker
        .register_job("RecordingJob", RecordingFactory { runs: runs.clone(), fail: true })
        .await;

    driver.push(metadata("job-1", 1)).await.unwrap();
    worker.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop(Duration::from_secs(1)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let failed = driver.failed_jobs(None).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "job-1");
    assert_eq!(failed[0].error_message.as_deref(), Some("synthetic failure"));
}

#[tokio::test]
async fn failing_jobs_are_released_for_backoff_not_failed() {
    let driver: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut worker = QueueWorker::new(worker_config(), driver.clone());
    worker
        .register_job("RecordingJob", RecordingFactory { runs: runs.clone(), fail: true })
        .await;

    driver.push(metadata("job-1", 5)).await.unwrap();
    worker.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop(Duration::from_secs(1)).await;

    // One attempt ran; the job is waiting out its 2s backoff, not parked.
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(driver.exists("job-1").await.unwrap());
    assert!(driver.failed_jobs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn jobs_without_a_factory_are_failed_outright() {
    let driver: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());

    let mut worker = QueueWorker::new(worker_config(), driver.clone());

    let mut orphan = metadata("job-1", 5);
    orphan.job_name = "UnknownJob".to_string();
    driver.push(orphan).await.unwrap();
    worker.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop(Duration::from_secs(1)).await;

    let failed = driver.failed_jobs(None).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, JobStatus::Failed);
}
