use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::sql_query;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::app::jobs::{enqueue_delivery, QueueDriver};
use crate::app::models::scheduled_send::{
    idempotency_key, NewScheduledSend, SendStatus, MESSAGE_TYPE_BIRTHDAY,
};
use crate::app::services::scheduled_send_service::ScheduledSendService;
use crate::app::services::user_service::UserService;
use crate::app::utils::occurrence::{is_birthday_on, local_today, resolve_send_instant};
use crate::config::Config;
use crate::database::{DbConnection, DbPool};

/// Advisory lock key gating sweeps across replicas.
const SWEEPER_LOCK_KEY: i64 = 0x5745_4550;

/// How long a job may sit reserved before it is considered orphaned.
const STUCK_JOB_AGE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct SweepSummary {
    pub total: usize,
    pub queued: usize,
    #[serde(rename = "skippedNotDue")]
    pub skipped_not_due: usize,
    #[serde(rename = "skippedAlreadyQueued")]
    pub skipped_already_queued: usize,
    pub failed: usize,
    #[serde(rename = "failedIds")]
    pub failed_ids: Vec<String>,
}

#[derive(QueryableByName)]
struct LockRow {
    #[diesel(sql_type = diesel::sql_types::Bool)]
    locked: bool,
}

/// Periodic coordinator. Each tick promotes today's birthdays into pending
/// records and hands due records to the queue. Every operation is keyed by
/// idempotency key, so an overlapping sweep from another replica collapses
/// into no-ops even if the advisory lock is unavailable.
pub struct SweeperService {
    pool: DbPool,
    queue: Arc<dyn QueueDriver>,
    message_hour: u32,
    max_retries: u32,
    failed_retention: Duration,
}

impl SweeperService {
    pub fn new(pool: DbPool, queue: Arc<dyn QueueDriver>, config: &Config) -> Self {
        Self {
            pool,
            queue,
            message_hour: config.delivery.message_hour,
            max_retries: config.queue.max_retries,
            failed_retention: Duration::from_secs(
                config.queue.failed_retention_days as u64 * 24 * 3600,
            ),
        }
    }

    /// One full sweep: promote, dispatch, queue housekeeping.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let lock_conn = match self.acquire_lock()? {
            Some(conn) => conn,
            None => {
                tracing::info!("Sweep lock held elsewhere, skipping this tick");
                return Ok(SweepSummary::default());
            }
        };

        let result = self.sweep_locked(now).await;
        Self::release_lock(lock_conn);
        result
    }

    async fn sweep_locked(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        self.promote_today(now)?;
        let summary = self.dispatch_due(now, false).await?;

        self.queue.release_stuck(STUCK_JOB_AGE).await?;
        self.queue.purge_failed(self.failed_retention).await?;

        tracing::info!(
            "Sweep finished: {} candidates, {} queued, {} not due, {} already queued, {} failed",
            summary.total,
            summary.queued,
            summary.skipped_not_due,
            summary.skipped_already_queued,
            summary.failed
        );

        Ok(summary)
    }

    /// Ensure every live recipient whose birthday is today (in their own
    /// zone) has a pending record.
    pub fn promote_today(&self, now: DateTime<Utc>) -> Result<()> {
        let users = UserService::find_all_live(&self.pool)?;

        for user in users {
            let Ok(tz) = user.timezone.parse::<Tz>() else {
                tracing::warn!(user_id = %user.id, "Skipping user with invalid timezone {}", user.timezone);
                continue;
            };

            let today = local_today(tz, now);
            if !is_birthday_on(user.birthdate, today) {
                continue;
            }

            let key = idempotency_key(&user.id, MESSAGE_TYPE_BIRTHDAY, today);

            match ScheduledSendService::find_by_key(&self.pool, &key)? {
                None => {
                    let Some(scheduled_for) = resolve_send_instant(today, tz, self.message_hour)
                    else {
                        tracing::warn!(user_id = %user.id, "Could not project send time for {}", today);
                        continue;
                    };

                    let new = NewScheduledSend::new(
                        user.id,
                        MESSAGE_TYPE_BIRTHDAY,
                        today,
                        scheduled_for,
                        SendStatus::Pending,
                        None,
                    );
                    ScheduledSendService::create_if_absent(&self.pool, new)?;
                    tracing::info!(user_id = %user.id, "Created pending send {}", key);
                }
                Some(record) if record.send_status() == Some(SendStatus::Unprocessed) => {
                    if let Err(e) = ScheduledSendService::transition(
                        &self.pool,
                        &record.id.to_string(),
                        SendStatus::Pending,
                        None,
                    ) {
                        tracing::warn!("Could not promote {}: {}", key, e);
                    }
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Hand due pending records to the queue. With `force` the send-time
    /// check is bypassed for records overdue or dated today; occurrences on
    /// a local date that has not started anywhere stay untouched.
    pub async fn dispatch_due(&self, now: DateTime<Utc>, force: bool) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        let trace_id = ulid::Ulid::new().to_string();

        // Local "today" across all zones is never more than a day away from
        // the UTC date.
        let utc_today = now.date_naive();
        let mut records = Vec::new();
        for offset in [-1i64, 0, 1] {
            let date = utc_today + ChronoDuration::days(offset);
            records.extend(ScheduledSendService::find_pending_for_local_date(&self.pool, date)?);
        }

        summary.total = records.len();

        for record in records {
            let due = record.scheduled_for <= now;
            let forceable = force && record.scheduled_date <= utc_today;

            if !due && !forceable {
                summary.skipped_not_due += 1;
                continue;
            }

            match enqueue_delivery(self.queue.as_ref(), &record, self.max_retries, Some(&trace_id)).await {
                Ok(true) => summary.queued += 1,
                Ok(false) => summary.skipped_already_queued += 1,
                Err(e) => {
                    tracing::error!("Failed to enqueue {}: {}", record.idempotency_key, e);
                    summary.failed += 1;
                    summary.failed_ids.push(record.idempotency_key.clone());
                }
            }
        }

        Ok(summary)
    }

    /// Cold-start recovery: reclaim orphaned jobs and requeue everything that
    /// came due while the process was down. Enqueues are idempotent, so
    /// records whose jobs survived the restart are skipped.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<u64> {
        self.queue.release_stuck(STUCK_JOB_AGE).await?;

        let due = ScheduledSendService::find_due(&self.pool, now, self.max_retries)?;
        let trace_id = ulid::Ulid::new().to_string();
        let mut queued = 0;

        for record in due {
            if enqueue_delivery(self.queue.as_ref(), &record, self.max_retries, Some(&trace_id)).await? {
                queued += 1;
            }
        }

        if queued > 0 {
            tracing::info!("Recovery queued {} overdue sends", queued);
        }

        Ok(queued)
    }

    /// Run forever: one immediate recovery sweep, then a sweep at minute 0
    /// of every hour, until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if let Err(e) = self.recover(Utc::now()).await {
            tracing::error!("Startup recovery failed: {}", e);
        }
        if let Err(e) = self.sweep(Utc::now()).await {
            tracing::error!("Startup sweep failed: {}", e);
        }

        loop {
            let pause = duration_until_next_hour(Utc::now());

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Sweeper shutting down");
                        return;
                    }
                }
            }

            if let Err(e) = self.sweep(Utc::now()).await {
                tracing::error!("Sweep failed: {}", e);
            }
        }
    }

    fn acquire_lock(&self) -> Result<Option<DbConnection>> {
        let mut conn = self.pool.get()?;

        let row: LockRow = sql_query("SELECT pg_try_advisory_lock($1) AS locked")
            .bind::<diesel::sql_types::BigInt, _>(SWEEPER_LOCK_KEY)
            .get_result(&mut conn)?;

        Ok(row.locked.then_some(conn))
    }

    fn release_lock(mut conn: DbConnection) {
        // The lock is session scoped; it must be dropped before the
        // connection goes back into the pool.
        if let Err(e) = sql_query("SELECT pg_advisory_unlock($1)")
            .bind::<diesel::sql_types::BigInt, _>(SWEEPER_LOCK_KEY)
            .execute(&mut conn)
        {
            tracing::error!("Failed to release sweep lock: {}", e);
        }
    }
}

/// Time until the next top of the hour.
pub fn duration_until_next_hour(now: DateTime<Utc>) -> Duration {
    let seconds_into_hour = (now.minute() * 60 + now.second()) as u64;
    Duration::from_secs(3600 - seconds_into_hour.min(3599))
}
