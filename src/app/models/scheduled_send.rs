use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use super::DieselUlid;

pub const MESSAGE_TYPE_BIRTHDAY: &str = "birthday";

/// Annotation left on a record created on the recipient's birthday after the
/// local send time has already passed. The record stays pending so a manual
/// trigger or the next sweep can still pick it up.
pub const LATE_CREATION_NOTE: &str =
    "recipient created after scheduled send time; awaiting manual trigger";

/// Lifecycle states of a scheduled send.
///
/// `Sent` and `Failed` are terminal. `Retrying` re-enters `Processing` on the
/// next delivery attempt. A `Failed` record may re-enter `Processing` only
/// through downtime recovery, while its attempt budget is not exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Unprocessed,
    Pending,
    Processing,
    Sent,
    Failed,
    Retrying,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Unprocessed => "unprocessed",
            SendStatus::Pending => "pending",
            SendStatus::Processing => "processing",
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
            SendStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Option<SendStatus> {
        match s {
            "unprocessed" => Some(SendStatus::Unprocessed),
            "pending" => Some(SendStatus::Pending),
            "processing" => Some(SendStatus::Processing),
            "sent" => Some(SendStatus::Sent),
            "failed" => Some(SendStatus::Failed),
            "retrying" => Some(SendStatus::Retrying),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SendStatus::Sent | SendStatus::Failed)
    }

    /// States a record may be in when moving into `to`. Conditional updates
    /// filter on this set so concurrent writers cannot race a record out of a
    /// terminal state.
    pub fn allowed_sources(to: SendStatus) -> &'static [SendStatus] {
        match to {
            SendStatus::Unprocessed => &[],
            SendStatus::Pending => &[SendStatus::Unprocessed],
            SendStatus::Processing => &[
                SendStatus::Pending,
                SendStatus::Retrying,
                SendStatus::Failed,
            ],
            SendStatus::Sent => &[SendStatus::Processing],
            SendStatus::Retrying => &[SendStatus::Processing],
            SendStatus::Failed => &[
                SendStatus::Unprocessed,
                SendStatus::Pending,
                SendStatus::Processing,
                SendStatus::Retrying,
            ],
        }
    }

    pub fn can_transition_to(&self, to: SendStatus) -> bool {
        SendStatus::allowed_sources(to).contains(self)
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One planned delivery occurrence for a recipient.
///
/// `idempotency_key` is `"{user_id}:{message_type}:{scheduled_date}"` and is
/// unique across all rows, terminal ones included, so at most one record can
/// ever exist per (recipient, type, local date).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::scheduled_sends)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScheduledSend {
    #[schema(example = "01ARZ3NDEKTSV4RRFFQ69G5FAV")]
    pub id: DieselUlid,
    pub user_id: DieselUlid,
    #[schema(example = "birthday")]
    pub message_type: String,
    /// Local calendar date of the occurrence in the recipient's timezone
    #[schema(example = "2024-01-15")]
    pub scheduled_date: NaiveDate,
    /// UTC projection of the local send time on `scheduled_date`
    #[schema(example = "2024-01-15T14:00:00Z")]
    pub scheduled_for: DateTime<Utc>,
    #[schema(example = "01ARZ3NDEKTSV4RRFFQ69G5FAV:birthday:2024-01-15")]
    pub idempotency_key: String,
    #[schema(example = "pending")]
    pub status: String,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::scheduled_sends)]
pub struct NewScheduledSend {
    pub id: DieselUlid,
    pub user_id: DieselUlid,
    pub message_type: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_for: DateTime<Utc>,
    pub idempotency_key: String,
    pub status: String,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn idempotency_key(user_id: &DieselUlid, message_type: &str, scheduled_date: NaiveDate) -> String {
    format!("{}:{}:{}", user_id, message_type, scheduled_date)
}

impl ScheduledSend {
    pub fn send_status(&self) -> Option<SendStatus> {
        SendStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.send_status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

impl NewScheduledSend {
    pub fn new(
        user_id: DieselUlid,
        message_type: &str,
        scheduled_date: NaiveDate,
        scheduled_for: DateTime<Utc>,
        status: SendStatus,
        error_message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        NewScheduledSend {
            id: DieselUlid::new(),
            user_id,
            message_type: message_type.to_string(),
            scheduled_date,
            scheduled_for,
            idempotency_key: idempotency_key(&user_id, message_type, scheduled_date),
            status: status.as_str().to_string(),
            attempt_count: 0,
            error_message,
            created_at: now,
            updated_at: now,
        }
    }
}
