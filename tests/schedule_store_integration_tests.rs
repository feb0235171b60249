//! Schedule Store & Planner Integration Tests
//!
//! These tests exercise the database-backed delivery engine logic against a
//! running Postgres instance: idempotent record creation, the conditional
//! status transition rules, and the planner's cancel/reschedule paths.
//! Connection settings come from the usual DB_* / DATABASE_URL environment.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serial_test::serial;
use std::sync::Arc;

use wisher::app::jobs::{enqueue_delivery, MemoryQueueDriver, QueueDriver};
use wisher::app::models::scheduled_send::{
    idempotency_key, NewScheduledSend, ScheduledSend, SendStatus, LATE_CREATION_NOTE,
    MESSAGE_TYPE_BIRTHDAY,
};
use wisher::app::models::user::{CreateUser, User};
use wisher::app::models::DieselUlid;
use wisher::app::services::birthday_planner_service::{
    BirthdayPlannerService, CANCELLED_BIRTHDATE_CHANGE,
};
use wisher::app::services::scheduled_send_service::ScheduledSendService;
use wisher::app::services::user_service::UserService;
use wisher::config::Config;
use wisher::database::{create_pool, run_migrations, DbPool};

// Setup function for tests
async fn setup_test_db() -> Result<DbPool> {
    // Planner assertions below assume the default send hour and retry budget.
    std::env::remove_var("BIRTHDAY_MESSAGE_HOUR");
    std::env::remove_var("QUEUE_MAX_RETRIES");

    let config = Config::load()?;
    let pool = create_pool(&config)?;
    run_migrations(&pool)?;
    Ok(pool)
}

// Helper function to create a test recipient row
fn create_test_user(pool: &DbPool, birthdate: &str, timezone: &str) -> Result<User> {
    let user = UserService::create_user(
        pool,
        CreateUser {
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: format!("{}@example.com", DieselUlid::new().to_string().to_lowercase()),
            birthdate: birthdate.parse()?,
            timezone: timezone.to_string(),
        },
    )?;

    Ok(user)
}

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().expect("valid RFC 3339 instant")
}

fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid date")
}

fn pending_record(pool: &DbPool, user: &User, scheduled_for: DateTime<Utc>) -> Result<ScheduledSend> {
    let new = NewScheduledSend::new(
        user.id,
        MESSAGE_TYPE_BIRTHDAY,
        scheduled_for.date_naive(),
        scheduled_for,
        SendStatus::Pending,
        None,
    );
    ScheduledSendService::create_if_absent(pool, new)
}

fn build_planner(pool: &DbPool, queue: Arc<dyn QueueDriver>) -> Result<BirthdayPlannerService> {
    let config = Config::load()?;
    Ok(BirthdayPlannerService::new(pool.clone(), queue, &config))
}

#[tokio::test]
#[serial]
async fn create_if_absent_returns_the_existing_row_unchanged() -> Result<()> {
    let pool = setup_test_db().await?;
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;
    let scheduled_for = utc("2024-06-01T09:00:00Z");

    let first = ScheduledSendService::create_if_absent(
        &pool,
        NewScheduledSend::new(
            user.id,
            MESSAGE_TYPE_BIRTHDAY,
            scheduled_for.date_naive(),
            scheduled_for,
            SendStatus::Unprocessed,
            None,
        ),
    )?;

    // Same key, different surrogate id and a different initial status: the
    // conflict is swallowed and the original row comes back untouched.
    let second = ScheduledSendService::create_if_absent(
        &pool,
        NewScheduledSend::new(
            user.id,
            MESSAGE_TYPE_BIRTHDAY,
            scheduled_for.date_naive(),
            scheduled_for,
            SendStatus::Pending,
            Some("should never be written".to_string()),
        ),
    )?;

    assert_eq!(second.id, first.id);
    assert_eq!(second.status, "unprocessed");
    assert!(second.error_message.is_none());

    Ok(())
}

#[tokio::test]
#[serial]
async fn transitions_enforce_the_state_machine_in_the_database() -> Result<()> {
    let pool = setup_test_db().await?;
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;
    let record = pending_record(&pool, &user, utc("2024-06-01T09:00:00Z"))?;
    let id = record.id.to_string();

    let processing = ScheduledSendService::transition(&pool, &id, SendStatus::Processing, None)?;
    assert_eq!(processing.status, "processing");
    assert_eq!(processing.attempt_count, 1);
    assert!(processing.last_attempt_at.is_some());

    let sent = ScheduledSendService::transition(&pool, &id, SendStatus::Sent, None)?;
    assert_eq!(sent.status, "sent");
    assert!(sent.sent_at.is_some());
    assert!(sent.error_message.is_none());

    // Sent is terminal: the conditional update matches no row and the state
    // is left untouched.
    assert!(ScheduledSendService::transition(&pool, &id, SendStatus::Processing, None).is_err());
    assert!(ScheduledSendService::transition(&pool, &id, SendStatus::Failed, Some("late")).is_err());

    let reloaded = ScheduledSendService::find_by_key(&pool, &record.idempotency_key)?.unwrap();
    assert_eq!(reloaded.status, "sent");
    assert_eq!(reloaded.attempt_count, 1);
    assert!(reloaded.error_message.is_none());

    Ok(())
}

#[tokio::test]
#[serial]
async fn two_transient_failures_then_success_count_three_attempts() -> Result<()> {
    let pool = setup_test_db().await?;
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;
    let record = pending_record(&pool, &user, utc("2024-06-01T09:00:00Z"))?;
    let id = record.id.to_string();

    for _ in 0..2 {
        ScheduledSendService::transition(&pool, &id, SendStatus::Processing, None)?;
        let retrying =
            ScheduledSendService::transition(&pool, &id, SendStatus::Retrying, Some("upstream 500"))?;
        assert_eq!(retrying.error_message.as_deref(), Some("upstream 500"));
    }

    ScheduledSendService::transition(&pool, &id, SendStatus::Processing, None)?;
    let sent = ScheduledSendService::transition(&pool, &id, SendStatus::Sent, None)?;

    assert_eq!(sent.attempt_count, 3);
    assert!(sent.sent_at.is_some());
    assert!(sent.error_message.is_none());

    Ok(())
}

#[tokio::test]
#[serial]
async fn rescheduling_is_rejected_once_a_worker_claims_the_record() -> Result<()> {
    let pool = setup_test_db().await?;
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;
    let record = pending_record(&pool, &user, utc("2024-06-01T13:00:00Z"))?;
    let id = record.id.to_string();

    let moved = ScheduledSendService::update_schedule(
        &pool,
        &id,
        record.scheduled_date,
        utc("2024-06-01T00:00:00Z"),
    )?;
    assert_eq!(moved.scheduled_for, utc("2024-06-01T00:00:00Z"));
    assert_eq!(moved.idempotency_key, record.idempotency_key);

    ScheduledSendService::transition(&pool, &id, SendStatus::Processing, None)?;

    assert!(ScheduledSendService::update_schedule(
        &pool,
        &id,
        record.scheduled_date,
        utc("2024-06-01T09:00:00Z"),
    )
    .is_err());

    let reloaded = ScheduledSendService::find_by_key(&pool, &record.idempotency_key)?.unwrap();
    assert_eq!(reloaded.scheduled_for, utc("2024-06-01T00:00:00Z"));

    Ok(())
}

#[tokio::test]
#[serial]
async fn find_due_surfaces_only_retriable_work() -> Result<()> {
    let pool = setup_test_db().await?;
    let overdue = Utc::now() - ChronoDuration::hours(1);

    let pending = pending_record(&pool, &create_test_user(&pool, "1990-06-01", "UTC")?, overdue)?;

    let retrying = pending_record(&pool, &create_test_user(&pool, "1990-06-02", "UTC")?, overdue)?;
    ScheduledSendService::transition(&pool, &retrying.id.to_string(), SendStatus::Processing, None)?;
    ScheduledSendService::transition(&pool, &retrying.id.to_string(), SendStatus::Retrying, Some("500"))?;

    let sent = pending_record(&pool, &create_test_user(&pool, "1990-06-03", "UTC")?, overdue)?;
    ScheduledSendService::transition(&pool, &sent.id.to_string(), SendStatus::Processing, None)?;
    ScheduledSendService::transition(&pool, &sent.id.to_string(), SendStatus::Sent, None)?;

    // Failed early: one attempt spent, budget left for restart recovery
    let failed_early = pending_record(&pool, &create_test_user(&pool, "1990-06-04", "UTC")?, overdue)?;
    ScheduledSendService::transition(&pool, &failed_early.id.to_string(), SendStatus::Processing, None)?;
    ScheduledSendService::transition(&pool, &failed_early.id.to_string(), SendStatus::Failed, Some("410"))?;

    // Failed with the whole budget spent: terminal for good
    let exhausted = pending_record(&pool, &create_test_user(&pool, "1990-06-05", "UTC")?, overdue)?;
    let exhausted_id = exhausted.id.to_string();
    for _ in 0..4 {
        ScheduledSendService::transition(&pool, &exhausted_id, SendStatus::Processing, None)?;
        ScheduledSendService::transition(&pool, &exhausted_id, SendStatus::Retrying, Some("500"))?;
    }
    ScheduledSendService::transition(&pool, &exhausted_id, SendStatus::Processing, None)?;
    ScheduledSendService::transition(&pool, &exhausted_id, SendStatus::Failed, Some("500"))?;

    let due_keys: Vec<String> = ScheduledSendService::find_due(&pool, Utc::now(), 5)?
        .into_iter()
        .map(|r| r.idempotency_key)
        .collect();

    assert!(due_keys.contains(&pending.idempotency_key));
    assert!(due_keys.contains(&retrying.idempotency_key));
    assert!(due_keys.contains(&failed_early.idempotency_key));
    assert!(!due_keys.contains(&sent.idempotency_key));
    assert!(!due_keys.contains(&exhausted.idempotency_key));

    Ok(())
}

#[tokio::test]
#[serial]
async fn birthdate_change_removes_the_job_before_cancelling_the_record() -> Result<()> {
    let pool = setup_test_db().await?;
    let queue: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());
    let planner = build_planner(&pool, queue.clone())?;

    // 08:00 UTC on the birthday, one hour before the send
    let now = utc("2024-06-01T08:00:00Z");
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;

    let record = planner.plan(&user, now)?.unwrap();
    assert_eq!(record.status, "pending");
    enqueue_delivery(queue.as_ref(), &record, 5, None).await?;
    assert!(queue.exists(&record.idempotency_key).await?);

    let mut updated = user.clone();
    updated.birthdate = date("1990-07-15");
    planner.on_user_updated(&updated, &user, "trace-1", now).await?;

    // Old occurrence: job gone, record cancelled with the documented reason
    assert!(!queue.exists(&record.idempotency_key).await?);
    let cancelled = ScheduledSendService::find_by_key(&pool, &record.idempotency_key)?.unwrap();
    assert_eq!(cancelled.status, "failed");
    assert_eq!(cancelled.error_message.as_deref(), Some(CANCELLED_BIRTHDATE_CHANGE));

    // New occurrence planned from the new birth date
    let new_key = idempotency_key(&user.id, MESSAGE_TYPE_BIRTHDAY, date("2024-07-15"));
    let replanned = ScheduledSendService::find_by_key(&pool, &new_key)?.unwrap();
    assert_eq!(replanned.status, "unprocessed");
    assert_eq!(replanned.scheduled_for, utc("2024-07-15T09:00:00Z"));

    Ok(())
}

#[tokio::test]
#[serial]
async fn birthdate_change_leaves_a_claimed_record_to_complete() -> Result<()> {
    let pool = setup_test_db().await?;
    let queue: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());
    let planner = build_planner(&pool, queue.clone())?;

    let now = utc("2024-06-01T08:00:00Z");
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;

    let record = planner.plan(&user, now)?.unwrap();
    ScheduledSendService::transition(&pool, &record.id.to_string(), SendStatus::Processing, None)?;

    let mut updated = user.clone();
    updated.birthdate = date("1990-07-15");
    planner.on_user_updated(&updated, &user, "trace-1", now).await?;

    // The in-flight delivery is not cancelled; only the new date is planned.
    let claimed = ScheduledSendService::find_by_key(&pool, &record.idempotency_key)?.unwrap();
    assert_eq!(claimed.status, "processing");
    assert_eq!(claimed.attempt_count, 1);

    let new_key = idempotency_key(&user.id, MESSAGE_TYPE_BIRTHDAY, date("2024-07-15"));
    assert!(ScheduledSendService::find_by_key(&pool, &new_key)?.is_some());

    Ok(())
}

#[tokio::test]
#[serial]
async fn timezone_change_recomputes_and_requeues_an_overdue_record() -> Result<()> {
    let pool = setup_test_db().await?;
    let queue: Arc<dyn QueueDriver> = Arc::new(MemoryQueueDriver::new());
    let planner = build_planner(&pool, queue.clone())?;

    // Registered at noon UTC on the birthday: 09:00 UTC has already passed
    let now = utc("2024-06-01T12:00:00Z");
    let user = create_test_user(&pool, "1990-06-01", "UTC")?;

    let record = planner.plan(&user, now)?.unwrap();
    assert_eq!(record.status, "pending");
    assert_eq!(record.error_message.as_deref(), Some(LATE_CREATION_NOTE));
    assert_eq!(record.scheduled_for, utc("2024-06-01T09:00:00Z"));

    let mut updated = user.clone();
    updated.timezone = "Asia/Tokyo".to_string();
    planner.on_user_updated(&updated, &user, "trace-1", now).await?;

    // Same local date, new UTC projection (09:00 JST), and since that
    // instant is already past the record is queued immediately.
    let rescheduled = ScheduledSendService::find_by_key(&pool, &record.idempotency_key)?.unwrap();
    assert_eq!(rescheduled.scheduled_date, date("2024-06-01"));
    assert_eq!(rescheduled.scheduled_for, utc("2024-06-01T00:00:00Z"));
    assert!(queue.exists(&record.idempotency_key).await?);

    Ok(())
}
