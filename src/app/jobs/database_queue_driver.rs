use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use std::time::Duration;

use crate::database::DbPool;
use crate::schema::jobs;
use crate::app::jobs::{JobMetadata, QueueDriver};
use crate::app::models::jobs::JobStatus;

/// Database row representation for the jobs table
#[derive(Debug, Queryable, Identifiable, QueryableByName)]
#[diesel(table_name = jobs)]
struct JobRow {
    id: String,
    queue_name: String,
    job_name: String,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    status: String,
    available_at: DateTime<Utc>,
    reserved_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Postgres-backed queue driver. Job ids are unique at the table level, so a
/// second enqueue of the same id collapses onto the existing row.
#[derive(Debug, Clone)]
pub struct DatabaseQueueDriver {
    pool: DbPool,
}

impl DatabaseQueueDriver {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_metadata(row: &JobRow) -> JobMetadata {
        JobMetadata {
            id: row.id.clone(),
            job_name: row.job_name.clone(),
            queue_name: row.queue_name.clone(),
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::Pending),
            payload: row.payload.clone(),
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            available_at: row.available_at,
            error_message: row.error_message.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl QueueDriver for DatabaseQueueDriver {
    async fn push(&self, metadata: JobMetadata) -> Result<bool> {
        let mut conn = self.pool.get()?;

        // A parked failed job with the same id is revived instead of blocking
        // the enqueue; any other conflict leaves the existing job untouched.
        let inserted = sql_query(
            r#"
            INSERT INTO jobs (id, queue_name, job_name, payload, attempts, max_attempts,
                              status, available_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, 'pending', $6, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET status = 'pending',
                available_at = EXCLUDED.available_at,
                failed_at = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE jobs.status = 'failed'
            "#,
        )
        .bind::<diesel::sql_types::Text, _>(&metadata.id)
        .bind::<diesel::sql_types::Text, _>(&metadata.queue_name)
        .bind::<diesel::sql_types::Text, _>(&metadata.job_name)
        .bind::<diesel::sql_types::Jsonb, _>(&metadata.payload)
        .bind::<diesel::sql_types::Integer, _>(metadata.max_attempts as i32)
        .bind::<diesel::sql_types::Timestamptz, _>(metadata.available_at)
        .execute(&mut conn)?;

        if inserted > 0 {
            tracing::debug!("Job {} pushed to queue '{}'", metadata.id, metadata.queue_name);
        }

        Ok(inserted > 0)
    }

    async fn pop(&self, queue_name: &str) -> Result<Option<JobMetadata>> {
        let mut conn = self.pool.get()?;

        // FOR UPDATE SKIP LOCKED needs raw SQL; Diesel has no dsl for it.
        let job_row: Option<JobRow> = sql_query(
            r#"
            UPDATE jobs
            SET status = 'processing',
                reserved_at = NOW(),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE queue_name = $1
                  AND status IN ('pending', 'retrying')
                  AND available_at <= NOW()
                ORDER BY available_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind::<diesel::sql_types::Text, _>(queue_name)
        .get_result(&mut conn)
        .optional()?;

        Ok(job_row.map(|row| Self::row_to_metadata(&row)))
    }

    async fn exists(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.pool.get()?;

        let count = jobs::table
            .filter(jobs::id.eq(job_id))
            .filter(jobs::status.eq_any(vec!["pending", "retrying", "processing"]))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count > 0)
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;

        let removed = diesel::delete(
            jobs::table
                .filter(jobs::id.eq(job_id))
                .filter(jobs::status.ne("processing")),
        )
        .execute(&mut conn)?;

        if removed > 0 {
            tracing::debug!("Job {} removed from queue before dispatch", job_id);
        }

        Ok(())
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;

        diesel::delete(jobs::table.filter(jobs::id.eq(job_id))).execute(&mut conn)?;

        Ok(())
    }

    async fn release(&self, metadata: &JobMetadata, delay: Duration, error: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let available_at = Utc::now() + chrono::Duration::from_std(delay)?;

        diesel::update(jobs::table.filter(jobs::id.eq(&metadata.id)))
            .set((
                jobs::status.eq("retrying"),
                jobs::available_at.eq(available_at),
                jobs::reserved_at.eq(None::<DateTime<Utc>>),
                jobs::error_message.eq(Some(error.to_string())),
                jobs::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        tracing::debug!(
            "Job {} released for retry in {:?} (attempt {}/{})",
            metadata.id,
            delay,
            metadata.attempts,
            metadata.max_attempts
        );

        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let now = Utc::now();

        diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
            .set((
                jobs::status.eq("failed"),
                jobs::failed_at.eq(Some(now)),
                jobs::error_message.eq(Some(error.to_string())),
                jobs::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn release_stuck(&self, older_than: Duration) -> Result<u64> {
        let mut conn = self.pool.get()?;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;

        let released = diesel::update(
            jobs::table
                .filter(jobs::status.eq("processing"))
                .filter(jobs::reserved_at.lt(Some(cutoff))),
        )
        .set((
            jobs::status.eq("pending"),
            jobs::reserved_at.eq(None::<DateTime<Utc>>),
            jobs::available_at.eq(Utc::now()),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        if released > 0 {
            tracing::warn!("Released {} jobs stuck in processing", released);
        }

        Ok(released as u64)
    }

    async fn purge_failed(&self, older_than: Duration) -> Result<u64> {
        let mut conn = self.pool.get()?;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;

        let purged = diesel::delete(
            jobs::table
                .filter(jobs::status.eq("failed"))
                .filter(jobs::failed_at.lt(Some(cutoff))),
        )
        .execute(&mut conn)?;

        if purged > 0 {
            tracing::info!("Purged {} failed jobs past retention", purged);
        }

        Ok(purged as u64)
    }

    async fn size(&self, queue_name: &str) -> Result<u64> {
        let mut conn = self.pool.get()?;

        let count = jobs::table
            .filter(jobs::queue_name.eq(queue_name))
            .filter(jobs::status.eq_any(vec!["pending", "retrying"]))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count as u64)
    }

    async fn failed_jobs(&self, limit: Option<u32>) -> Result<Vec<JobMetadata>> {
        let mut conn = self.pool.get()?;
        let limit_val = limit.unwrap_or(100) as i64;

        let rows = jobs::table
            .filter(jobs::status.eq("failed"))
            .order(jobs::failed_at.desc())
            .limit(limit_val)
            .load::<JobRow>(&mut conn)?;

        Ok(rows.iter().map(Self::row_to_metadata).collect())
    }

    fn driver_name(&self) -> &'static str {
        "database"
    }
}
