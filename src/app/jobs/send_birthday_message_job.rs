use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app::jobs::{Job, JobContext, JobFactory};
use crate::app::models::scheduled_send::SendStatus;
use crate::app::services::email_delivery_service::EmailDeliveryService;
use crate::app::services::scheduled_send_service::ScheduledSendService;
use crate::app::services::user_service::UserService;
use crate::database::DbPool;

pub const JOB_NAME: &str = "SendBirthdayMessageJob";

pub const RECIPIENT_UNAVAILABLE: &str = "recipient unavailable";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBirthdayPayload {
    pub user_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub trace_id: Option<String>,
}

/// Delivers one scheduled birthday message. The job id is the scheduled
/// send's idempotency key; everything the job does is keyed off the record
/// it resolves to, so duplicate jobs collapse into no-ops.
pub struct SendBirthdayMessageJob {
    payload: SendBirthdayPayload,
    pool: DbPool,
    delivery: Arc<EmailDeliveryService>,
}

impl SendBirthdayMessageJob {
    pub fn new(payload: SendBirthdayPayload, pool: DbPool, delivery: Arc<EmailDeliveryService>) -> Self {
        Self { payload, pool, delivery }
    }
}

#[async_trait]
impl Job for SendBirthdayMessageJob {
    fn job_name(&self) -> &'static str {
        JOB_NAME
    }

    async fn handle(&self, ctx: &JobContext) -> Result<()> {
        let record = match ScheduledSendService::find_by_key(&self.pool, &ctx.job_id)? {
            Some(record) => record,
            None => {
                tracing::error!(
                    job_id = %ctx.job_id,
                    "No scheduled send for queued job; dropping"
                );
                return Ok(());
            }
        };

        if record.send_status() == Some(SendStatus::Sent) {
            tracing::info!(job_id = %ctx.job_id, "Scheduled send already delivered, acknowledging");
            return Ok(());
        }

        let record_id = record.id.to_string();

        if let Err(e) = ScheduledSendService::transition(&self.pool, &record_id, SendStatus::Processing, None) {
            // Another worker holds it, or it reached a terminal state between
            // the lookup and the claim.
            tracing::warn!(job_id = %ctx.job_id, "Could not claim scheduled send: {}", e);
            return Ok(());
        }

        let user = UserService::find_by_id(&self.pool, &self.payload.user_id)?;
        let user = match user {
            Some(user) if !user.is_deleted() => user,
            _ => {
                tracing::warn!(
                    job_id = %ctx.job_id,
                    user_id = %self.payload.user_id,
                    "Recipient missing or deleted, finalising as failed"
                );
                ScheduledSendService::transition(
                    &self.pool,
                    &record_id,
                    SendStatus::Failed,
                    Some(RECIPIENT_UNAVAILABLE),
                )?;
                return Ok(());
            }
        };

        let message = EmailDeliveryService::render_birthday_message(&user);

        match self.delivery.send(&user.email, &message).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %ctx.job_id,
                    trace_id = ctx.trace_id.as_deref().unwrap_or("-"),
                    "Birthday message delivered to {}",
                    user.email
                );

                if let Err(e) =
                    ScheduledSendService::transition(&self.pool, &record_id, SendStatus::Sent, None)
                {
                    // The message is out; never hand the job back for a retry.
                    tracing::error!(
                        job_id = %ctx.job_id,
                        "Delivered but could not finalise record as sent: {}",
                        e
                    );
                }

                Ok(())
            }
            Err(e) if !e.is_retriable() => {
                tracing::warn!(
                    job_id = %ctx.job_id,
                    "Permanent delivery failure, finalising as failed: {}",
                    e
                );
                ScheduledSendService::transition(
                    &self.pool,
                    &record_id,
                    SendStatus::Failed,
                    Some(&e.to_string()),
                )?;
                Ok(())
            }
            Err(e) => {
                let exhausted = ctx.attempt >= ctx.max_attempts;
                let status = if exhausted { SendStatus::Failed } else { SendStatus::Retrying };

                ScheduledSendService::transition(
                    &self.pool,
                    &record_id,
                    status,
                    Some(&e.to_string()),
                )?;

                Err(e.into())
            }
        }
    }

    async fn failed(&self, ctx: &JobContext, error: &anyhow::Error) {
        tracing::error!(
            job_id = %ctx.job_id,
            user_id = %self.payload.user_id,
            "Birthday delivery gave up after {} attempts: {}",
            ctx.max_attempts,
            error
        );
    }
}

pub struct SendBirthdayMessageFactory {
    pool: DbPool,
    delivery: Arc<EmailDeliveryService>,
}

impl SendBirthdayMessageFactory {
    pub fn new(pool: DbPool, delivery: Arc<EmailDeliveryService>) -> Self {
        Self { pool, delivery }
    }
}

impl JobFactory for SendBirthdayMessageFactory {
    fn create_job(&self, payload: &serde_json::Value) -> Result<Box<dyn Job>> {
        let payload: SendBirthdayPayload = serde_json::from_value(payload.clone())?;
        Ok(Box::new(SendBirthdayMessageJob::new(
            payload,
            self.pool.clone(),
            self.delivery.clone(),
        )))
    }
}
