use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum delivery attempts per job before it is parked as failed.
    pub max_retries: u32,
    /// Number of concurrent worker tasks draining the queue.
    pub concurrency: usize,
    /// Days failed jobs are kept around for inspection before cleanup.
    pub failed_retention_days: u32,
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        Ok(QueueConfig {
            max_retries: env::var("QUEUE_MAX_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            concurrency: env::var("QUEUE_CONCURRENCY")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            failed_retention_days: env::var("QUEUE_FAILED_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
        })
    }
}
