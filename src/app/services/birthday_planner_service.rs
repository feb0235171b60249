use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use crate::app::jobs::{enqueue_delivery, QueueDriver};
use crate::app::models::scheduled_send::{
    idempotency_key, NewScheduledSend, ScheduledSend, SendStatus, LATE_CREATION_NOTE,
    MESSAGE_TYPE_BIRTHDAY,
};
use crate::app::models::user::User;
use crate::app::services::scheduled_send_service::ScheduledSendService;
use crate::app::utils::occurrence::{local_today, next_occurrence, resolve_send_instant, Occurrence};
use crate::config::Config;
use crate::database::DbPool;

pub const CANCELLED_BIRTHDATE_CHANGE: &str = "cancelled due to birthdate change";

/// Initial status and annotation for a freshly planned occurrence. An
/// occurrence later this year starts unprocessed; one falling today starts
/// pending, annotated when the local send time has already passed.
pub fn initial_disposition(
    occurrence: &Occurrence,
    today: chrono::NaiveDate,
    now: DateTime<Utc>,
) -> (SendStatus, Option<String>) {
    if occurrence.local_date == today {
        let note = (occurrence.scheduled_for <= now).then(|| LATE_CREATION_NOTE.to_string());
        (SendStatus::Pending, note)
    } else {
        (SendStatus::Unprocessed, None)
    }
}

/// Reacts to recipient lifecycle changes by materialising, rescheduling or
/// cancelling scheduled send records.
///
/// Ordering rule: any queued delivery job is removed before the record is
/// touched, so a worker cannot pick up a job whose record is about to become
/// obsolete. A record already in processing (or sent) is never cancelled; in
/// that window the old occurrence is allowed to complete and only the new
/// one is planned.
pub struct BirthdayPlannerService {
    pool: DbPool,
    queue: Arc<dyn QueueDriver>,
    message_hour: u32,
    max_retries: u32,
}

impl BirthdayPlannerService {
    pub fn new(pool: DbPool, queue: Arc<dyn QueueDriver>, config: &Config) -> Self {
        Self {
            pool,
            queue,
            message_hour: config.delivery.message_hour,
            max_retries: config.queue.max_retries,
        }
    }

    fn timezone_of(user: &User) -> Result<Tz> {
        user.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("user {} has invalid timezone {}", user.id, user.timezone))
    }

    /// Materialise the next birthday occurrence for a recipient.
    ///
    /// A record created on the birthday itself starts out pending; when the
    /// local send time has already passed it is annotated and left for the
    /// manual trigger or the next sweep.
    pub fn plan(&self, user: &User, now: DateTime<Utc>) -> Result<Option<ScheduledSend>> {
        let tz = Self::timezone_of(user)?;

        let occurrence = next_occurrence(
            user.birthdate.month(),
            user.birthdate.day(),
            tz,
            self.message_hour,
            now,
        )
        .ok_or_else(|| anyhow::anyhow!("could not resolve occurrence for user {}", user.id))?;

        let today = local_today(tz, now);
        if occurrence.local_date < today {
            return Ok(None);
        }

        let (status, note) = initial_disposition(&occurrence, today, now);

        let new = NewScheduledSend::new(
            user.id,
            MESSAGE_TYPE_BIRTHDAY,
            occurrence.local_date,
            occurrence.scheduled_for,
            status,
            note,
        );

        let record = ScheduledSendService::create_if_absent(&self.pool, new)?;

        tracing::info!(
            user_id = %user.id,
            "Planned birthday send {} for {} ({})",
            record.idempotency_key,
            record.scheduled_date,
            record.scheduled_for
        );

        Ok(Some(record))
    }

    pub async fn on_user_created(&self, user: &User, now: DateTime<Utc>) -> Result<()> {
        self.plan(user, now)?;
        Ok(())
    }

    pub async fn on_user_updated(
        &self,
        user: &User,
        old_user: &User,
        trace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let birthdate_changed = user.birthdate != old_user.birthdate;
        let timezone_changed = user.timezone != old_user.timezone;

        if birthdate_changed {
            self.cancel_planned_occurrence(old_user, now).await?;
            self.plan(user, now)?;
        } else if timezone_changed {
            self.reschedule_for_timezone(user, old_user, trace_id, now).await?;
        }

        Ok(())
    }

    /// Cancel the occurrence planned from the old birth date, unless a worker
    /// already has it or it was delivered.
    async fn cancel_planned_occurrence(&self, old_user: &User, now: DateTime<Utc>) -> Result<()> {
        let Some(key) = self.planned_key(old_user, now) else {
            return Ok(());
        };

        self.queue.remove(&key).await?;

        let Some(record) = ScheduledSendService::find_by_key(&self.pool, &key)? else {
            return Ok(());
        };

        match record.send_status() {
            Some(SendStatus::Unprocessed) | Some(SendStatus::Pending) => {
                match ScheduledSendService::transition(
                    &self.pool,
                    &record.id.to_string(),
                    SendStatus::Failed,
                    Some(CANCELLED_BIRTHDATE_CHANGE),
                ) {
                    Ok(_) => {
                        tracing::info!("Cancelled scheduled send {} after birthdate change", key);
                    }
                    Err(e) => {
                        // The record moved on between the lookup and the
                        // cancellation; let the in-flight delivery finish.
                        tracing::warn!("Skipped cancelling {}: {}", key, e);
                    }
                }
            }
            _ => {
                tracing::info!(
                    "Scheduled send {} is {} and is left to complete",
                    key,
                    record.status
                );
            }
        }

        Ok(())
    }

    /// Recompute the UTC projection of an occurrence after a timezone change,
    /// keeping its local calendar date. A record whose new send instant is
    /// already in the past is dispatched immediately.
    async fn reschedule_for_timezone(
        &self,
        user: &User,
        old_user: &User,
        trace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(key) = self.planned_key(old_user, now) else {
            return Ok(());
        };

        self.queue.remove(&key).await?;

        let Some(record) = ScheduledSendService::find_by_key(&self.pool, &key)? else {
            return Ok(());
        };

        match record.send_status() {
            Some(SendStatus::Unprocessed) | Some(SendStatus::Pending) => {}
            _ => return Ok(()),
        }

        let new_tz = Self::timezone_of(user)?;
        let scheduled_for = resolve_send_instant(record.scheduled_date, new_tz, self.message_hour)
            .ok_or_else(|| {
                anyhow::anyhow!("could not project {} into {}", record.scheduled_date, new_tz)
            })?;

        let updated = ScheduledSendService::update_schedule(
            &self.pool,
            &record.id.to_string(),
            record.scheduled_date,
            scheduled_for,
        )?;

        tracing::info!(
            user_id = %user.id,
            "Rescheduled {} to {} after timezone change",
            updated.idempotency_key,
            updated.scheduled_for
        );

        if updated.send_status() == Some(SendStatus::Pending) && updated.scheduled_for <= now {
            enqueue_delivery(self.queue.as_ref(), &updated, self.max_retries, Some(trace_id)).await?;
        }

        Ok(())
    }

    /// Idempotency key of the occurrence the planner would have created for
    /// this recipient projection.
    fn planned_key(&self, user: &User, now: DateTime<Utc>) -> Option<String> {
        let tz = user.timezone.parse::<Tz>().ok()?;
        let occurrence = next_occurrence(
            user.birthdate.month(),
            user.birthdate.day(),
            tz,
            self.message_hour,
            now,
        )?;

        Some(idempotency_key(&user.id, MESSAGE_TYPE_BIRTHDAY, occurrence.local_date))
    }
}
