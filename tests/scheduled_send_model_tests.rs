use chrono::{NaiveDate, Utc};

use wisher::app::models::scheduled_send::{
    idempotency_key, NewScheduledSend, SendStatus, MESSAGE_TYPE_BIRTHDAY,
};
use wisher::app::models::DieselUlid;

#[test]
fn status_round_trips_through_strings() {
    for status in [
        SendStatus::Unprocessed,
        SendStatus::Pending,
        SendStatus::Processing,
        SendStatus::Sent,
        SendStatus::Failed,
        SendStatus::Retrying,
    ] {
        assert_eq!(SendStatus::parse(status.as_str()), Some(status));
    }

    assert_eq!(SendStatus::parse("shipped"), None);
}

#[test]
fn sent_and_failed_are_terminal() {
    assert!(SendStatus::Sent.is_terminal());
    assert!(SendStatus::Failed.is_terminal());
    assert!(!SendStatus::Pending.is_terminal());
    assert!(!SendStatus::Processing.is_terminal());
    assert!(!SendStatus::Retrying.is_terminal());
    assert!(!SendStatus::Unprocessed.is_terminal());
}

#[test]
fn sent_records_never_transition_out() {
    for to in [
        SendStatus::Unprocessed,
        SendStatus::Pending,
        SendStatus::Processing,
        SendStatus::Failed,
        SendStatus::Retrying,
        SendStatus::Sent,
    ] {
        assert!(!SendStatus::Sent.can_transition_to(to));
    }
}

#[test]
fn lifecycle_follows_the_state_machine() {
    assert!(SendStatus::Unprocessed.can_transition_to(SendStatus::Pending));
    assert!(SendStatus::Pending.can_transition_to(SendStatus::Processing));
    assert!(SendStatus::Processing.can_transition_to(SendStatus::Sent));
    assert!(SendStatus::Processing.can_transition_to(SendStatus::Retrying));
    assert!(SendStatus::Processing.can_transition_to(SendStatus::Failed));
    assert!(SendStatus::Retrying.can_transition_to(SendStatus::Processing));

    // Cancellation paths
    assert!(SendStatus::Unprocessed.can_transition_to(SendStatus::Failed));
    assert!(SendStatus::Pending.can_transition_to(SendStatus::Failed));

    // Restart recovery may re-run a failed record that still has budget
    assert!(SendStatus::Failed.can_transition_to(SendStatus::Processing));

    assert!(!SendStatus::Pending.can_transition_to(SendStatus::Sent));
    assert!(!SendStatus::Unprocessed.can_transition_to(SendStatus::Processing));
    assert!(!SendStatus::Failed.can_transition_to(SendStatus::Sent));
}

#[test]
fn idempotency_key_is_user_type_and_local_date() {
    let user_id = DieselUlid::new();
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

    let key = idempotency_key(&user_id, MESSAGE_TYPE_BIRTHDAY, date);

    assert_eq!(key, format!("{}:birthday:2024-01-15", user_id));
}

#[test]
fn new_records_start_with_a_clean_attempt_history() {
    let user_id = DieselUlid::new();
    let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let scheduled_for = Utc::now();

    let new = NewScheduledSend::new(
        user_id,
        MESSAGE_TYPE_BIRTHDAY,
        date,
        scheduled_for,
        SendStatus::Unprocessed,
        None,
    );

    assert_eq!(new.user_id, user_id);
    assert_eq!(new.status, "unprocessed");
    assert_eq!(new.attempt_count, 0);
    assert_eq!(new.scheduled_date, date);
    assert_eq!(new.scheduled_for, scheduled_for);
    assert_eq!(new.idempotency_key, idempotency_key(&user_id, MESSAGE_TYPE_BIRTHDAY, date));
    assert!(new.error_message.is_none());
}
