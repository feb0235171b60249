use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use thiserror::Error;

use crate::database::DbPool;
use crate::schema::scheduled_sends;
use crate::app::models::scheduled_send::{
    idempotency_key, NewScheduledSend, ScheduledSend, SendStatus,
};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("scheduled send {0} not found")]
    NotFound(String),
    #[error("invalid transition of scheduled send {id} from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: SendStatus },
    #[error("scheduled send {id} in status {status} can no longer be rescheduled")]
    NotReschedulable { id: String, status: String },
}

/// Durable store of scheduled send records. All writes commit before
/// returning; status changes go through conditional updates so a record that
/// has already moved on (or reached a terminal state) is never overwritten.
pub struct ScheduledSendService;

impl ScheduledSendService {
    /// Insert a record keyed by its idempotency key. If a record with that
    /// key already exists, it is returned unchanged; the duplicate insert is
    /// swallowed.
    pub fn create_if_absent(pool: &DbPool, new: NewScheduledSend) -> Result<ScheduledSend> {
        let mut conn = pool.get()?;
        let key = new.idempotency_key.clone();

        diesel::insert_into(scheduled_sends::table)
            .values(&new)
            .on_conflict(scheduled_sends::idempotency_key)
            .do_nothing()
            .execute(&mut conn)?;

        let record = scheduled_sends::table
            .filter(scheduled_sends::idempotency_key.eq(&key))
            .select(ScheduledSend::as_select())
            .first::<ScheduledSend>(&mut conn)?;

        Ok(record)
    }

    pub fn find_by_key(pool: &DbPool, key: &str) -> Result<Option<ScheduledSend>> {
        let mut conn = pool.get()?;

        let result = scheduled_sends::table
            .filter(scheduled_sends::idempotency_key.eq(key))
            .select(ScheduledSend::as_select())
            .first::<ScheduledSend>(&mut conn)
            .optional()?;

        Ok(result)
    }

    pub fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<ScheduledSend>> {
        let mut conn = pool.get()?;

        let result = scheduled_sends::table
            .filter(scheduled_sends::id.eq(id))
            .select(ScheduledSend::as_select())
            .first::<ScheduledSend>(&mut conn)
            .optional()?;

        Ok(result)
    }

    /// Pending records whose occurrence falls on the given local calendar
    /// date, regardless of whether their UTC send instant has arrived yet.
    pub fn find_pending_for_local_date(pool: &DbPool, date: NaiveDate) -> Result<Vec<ScheduledSend>> {
        let mut conn = pool.get()?;

        let records = scheduled_sends::table
            .filter(scheduled_sends::status.eq(SendStatus::Pending.as_str()))
            .filter(scheduled_sends::scheduled_date.eq(date))
            .order(scheduled_sends::scheduled_for.asc())
            .select(ScheduledSend::as_select())
            .load::<ScheduledSend>(&mut conn)?;

        Ok(records)
    }

    /// Records overdue at `cutoff`: pending or retrying, plus failed records
    /// that still have attempt budget left. The latter only surface here so a
    /// restart can pick up work that died mid-flight.
    pub fn find_due(
        pool: &DbPool,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<ScheduledSend>> {
        let mut conn = pool.get()?;

        let retriable = vec![
            SendStatus::Pending.as_str(),
            SendStatus::Retrying.as_str(),
        ];

        let records = scheduled_sends::table
            .filter(scheduled_sends::scheduled_for.le(cutoff))
            .filter(
                scheduled_sends::status.eq_any(retriable).or(scheduled_sends::status
                    .eq(SendStatus::Failed.as_str())
                    .and(scheduled_sends::attempt_count.lt(max_attempts as i32))),
            )
            .order(scheduled_sends::scheduled_for.asc())
            .select(ScheduledSend::as_select())
            .load::<ScheduledSend>(&mut conn)?;

        Ok(records)
    }

    /// Apply a status transition. The update is conditional on the record
    /// still being in a state allowed to move to `to`; otherwise the state is
    /// left untouched and `ScheduleError::InvalidTransition` is returned.
    ///
    /// Entering `Processing` counts an attempt and stamps `last_attempt_at`.
    /// Entering `Sent` stamps `sent_at` and clears any stale error. Entering
    /// `Failed` or `Retrying` records the triggering error.
    pub fn transition(
        pool: &DbPool,
        id: &str,
        to: SendStatus,
        error_message: Option<&str>,
    ) -> Result<ScheduledSend> {
        let mut conn = pool.get()?;
        let now = Utc::now();

        let sources: Vec<&'static str> = SendStatus::allowed_sources(to)
            .iter()
            .map(|s| s.as_str())
            .collect();

        let target = scheduled_sends::table
            .filter(scheduled_sends::id.eq(id))
            .filter(scheduled_sends::status.eq_any(sources));

        let updated: Option<ScheduledSend> = match to {
            SendStatus::Processing => diesel::update(target)
                .set((
                    scheduled_sends::status.eq(to.as_str()),
                    scheduled_sends::attempt_count.eq(scheduled_sends::attempt_count + 1),
                    scheduled_sends::last_attempt_at.eq(Some(now)),
                    scheduled_sends::updated_at.eq(now),
                ))
                .returning(ScheduledSend::as_select())
                .get_result::<ScheduledSend>(&mut conn)
                .optional()?,
            SendStatus::Sent => diesel::update(target)
                .set((
                    scheduled_sends::status.eq(to.as_str()),
                    scheduled_sends::sent_at.eq(Some(now)),
                    scheduled_sends::error_message.eq(None::<String>),
                    scheduled_sends::updated_at.eq(now),
                ))
                .returning(ScheduledSend::as_select())
                .get_result::<ScheduledSend>(&mut conn)
                .optional()?,
            SendStatus::Failed | SendStatus::Retrying => diesel::update(target)
                .set((
                    scheduled_sends::status.eq(to.as_str()),
                    scheduled_sends::error_message.eq(error_message.map(|e| e.to_string())),
                    scheduled_sends::updated_at.eq(now),
                ))
                .returning(ScheduledSend::as_select())
                .get_result::<ScheduledSend>(&mut conn)
                .optional()?,
            SendStatus::Pending | SendStatus::Unprocessed => diesel::update(target)
                .set((
                    scheduled_sends::status.eq(to.as_str()),
                    scheduled_sends::updated_at.eq(now),
                ))
                .returning(ScheduledSend::as_select())
                .get_result::<ScheduledSend>(&mut conn)
                .optional()?,
        };

        match updated {
            Some(record) => Ok(record),
            None => {
                let current = Self::find_by_id(pool, id)?;
                match current {
                    Some(record) => Err(ScheduleError::InvalidTransition {
                        id: id.to_string(),
                        from: record.status,
                        to,
                    }
                    .into()),
                    None => Err(ScheduleError::NotFound(id.to_string()).into()),
                }
            }
        }
    }

    /// Move an occurrence to a new date and/or UTC instant. Only valid while
    /// the record has not yet entered processing. The idempotency key is kept
    /// in step with the occurrence date.
    pub fn update_schedule(
        pool: &DbPool,
        id: &str,
        scheduled_date: NaiveDate,
        scheduled_for: DateTime<Utc>,
    ) -> Result<ScheduledSend> {
        let mut conn = pool.get()?;
        let now = Utc::now();

        let current = Self::find_by_id(pool, id)?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        let key = idempotency_key(&current.user_id, &current.message_type, scheduled_date);

        let reschedulable = vec![
            SendStatus::Unprocessed.as_str(),
            SendStatus::Pending.as_str(),
        ];

        let updated: Option<ScheduledSend> = diesel::update(
            scheduled_sends::table
                .filter(scheduled_sends::id.eq(id))
                .filter(scheduled_sends::status.eq_any(reschedulable)),
        )
        .set((
            scheduled_sends::scheduled_date.eq(scheduled_date),
            scheduled_sends::scheduled_for.eq(scheduled_for),
            scheduled_sends::idempotency_key.eq(&key),
            scheduled_sends::updated_at.eq(now),
        ))
        .returning(ScheduledSend::as_select())
        .get_result::<ScheduledSend>(&mut conn)
        .optional()?;

        updated.ok_or_else(|| {
            ScheduleError::NotReschedulable {
                id: id.to_string(),
                status: current.status,
            }
            .into()
        })
    }
}
