use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::app::jobs::{backoff_delay, JobContext, JobFactory, JobMetadata, QueueDriver};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    pub concurrency: usize,
    /// Hard per-job runtime budget.
    pub job_timeout: Duration,
    /// Idle sleep between polls when the queue is empty.
    pub sleep_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: "default".to_string(),
            concurrency: 5,
            job_timeout: Duration::from_secs(60),
            sleep_duration: Duration::from_secs(1),
        }
    }
}

type JobRegistry = Arc<RwLock<HashMap<String, Box<dyn JobFactory>>>>;

/// Pulls jobs off a queue with bounded concurrency. Jobs that return an
/// error are retried with exponential backoff until their attempt budget is
/// spent, then parked as failed.
pub struct QueueWorker {
    config: WorkerConfig,
    driver: Arc<dyn QueueDriver>,
    job_registry: JobRegistry,
    shutdown_tx: Option<watch::Sender<bool>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl QueueWorker {
    pub fn new(config: WorkerConfig, driver: Arc<dyn QueueDriver>) -> Self {
        Self {
            config,
            driver,
            job_registry: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx: None,
            handles: Vec::new(),
        }
    }

    pub async fn register_job(&self, job_name: &str, factory: impl JobFactory + 'static) {
        let mut registry = self.job_registry.write().await;
        registry.insert(job_name.to_string(), Box::new(factory));
        info!("Registered job factory for: {}", job_name);
    }

    /// Spawn the worker tasks. Returns immediately; call `stop` to drain.
    pub fn start(&mut self) {
        if self.shutdown_tx.is_some() {
            warn!("Queue worker '{}' is already running", self.config.queue_name);
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        info!(
            "Starting queue worker for '{}' with concurrency {}",
            self.config.queue_name, self.config.concurrency
        );

        for worker_id in 0..self.config.concurrency {
            let config = self.config.clone();
            let driver = self.driver.clone();
            let registry = self.job_registry.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            let handle = tokio::spawn(async move {
                info!("Worker {}-{} started", config.queue_name, worker_id);

                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }

                    match Self::process_next_job(&config, &driver, &registry).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tokio::select! {
                                _ = sleep(config.sleep_duration) => {}
                                _ = shutdown_rx.changed() => {}
                            }
                        }
                        Err(e) => {
                            error!("Worker {}-{} error: {}", config.queue_name, worker_id, e);
                            sleep(config.sleep_duration).await;
                        }
                    }
                }

                info!("Worker {}-{} stopped", config.queue_name, worker_id);
            });

            self.handles.push(handle);
        }
    }

    /// Stop accepting jobs and let in-flight ones finish within `deadline`.
    pub async fn stop(&mut self, deadline: Duration) {
        let Some(tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = tx.send(true);

        let drain = futures::future::join_all(self.handles.drain(..));
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!(
                "Queue worker '{}' did not drain within {:?}",
                self.config.queue_name, deadline
            );
        } else {
            info!("Queue worker '{}' stopped gracefully", self.config.queue_name);
        }
    }

    async fn process_next_job(
        config: &WorkerConfig,
        driver: &Arc<dyn QueueDriver>,
        registry: &JobRegistry,
    ) -> Result<bool> {
        let metadata = match driver.pop(&config.queue_name).await? {
            Some(metadata) => metadata,
            None => return Ok(false),
        };

        let ctx = JobContext {
            job_id: metadata.id.clone(),
            attempt: metadata.attempts,
            max_attempts: metadata.max_attempts,
            trace_id: metadata
                .payload
                .get("trace_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };

        info!(
            job_id = %ctx.job_id,
            trace_id = ctx.trace_id.as_deref().unwrap_or("-"),
            "Processing job {} (attempt {}/{})",
            metadata.job_name,
            ctx.attempt,
            ctx.max_attempts
        );

        let job = {
            let registry = registry.read().await;
            match registry.get(&metadata.job_name) {
                Some(factory) => factory.create_job(&metadata.payload),
                None => Err(anyhow::anyhow!(
                    "No factory registered for job type: {}",
                    metadata.job_name
                )),
            }
        };

        let job = match job {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %ctx.job_id, "Failed to build job: {}", e);
                driver.fail(&metadata.id, &e.to_string()).await?;
                return Ok(true);
            }
        };

        let outcome = tokio::time::timeout(config.job_timeout, job.handle(&ctx)).await;

        match outcome {
            Ok(Ok(())) => {
                driver.complete(&metadata.id).await?;
            }
            Ok(Err(e)) => {
                Self::retry_or_fail(driver, &metadata, &ctx, job.as_ref(), e).await?;
            }
            Err(_) => {
                let e = anyhow::anyhow!("job timed out after {:?}", config.job_timeout);
                Self::retry_or_fail(driver, &metadata, &ctx, job.as_ref(), e).await?;
            }
        }

        Ok(true)
    }

    async fn retry_or_fail(
        driver: &Arc<dyn QueueDriver>,
        metadata: &JobMetadata,
        ctx: &JobContext,
        job: &dyn crate::app::jobs::Job,
        error: anyhow::Error,
    ) -> Result<()> {
        if metadata.attempts >= metadata.max_attempts {
            error!(
                job_id = %ctx.job_id,
                "Job failed permanently after {} attempts: {}",
                metadata.attempts,
                error
            );
            driver.fail(&metadata.id, &error.to_string()).await?;
            job.failed(ctx, &error).await;
        } else {
            let delay = backoff_delay(metadata.attempts);
            warn!(
                job_id = %ctx.job_id,
                "Job attempt {}/{} failed, retrying in {:?}: {}",
                metadata.attempts,
                metadata.max_attempts,
                delay,
                error
            );
            driver.release(metadata, delay, &error.to_string()).await?;
        }

        Ok(())
    }
}
