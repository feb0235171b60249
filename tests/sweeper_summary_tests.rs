use chrono::{DateTime, Utc};
use std::time::Duration;

use wisher::app::services::sweeper_service::{duration_until_next_hour, SweepSummary};

fn utc(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().expect("valid RFC 3339 instant")
}

#[test]
fn summary_serialises_with_the_api_field_names() {
    let summary = SweepSummary {
        total: 3,
        queued: 1,
        skipped_not_due: 1,
        skipped_already_queued: 1,
        failed: 0,
        failed_ids: vec![],
    };

    let body = serde_json::to_value(&summary).unwrap();

    assert_eq!(body["total"], 3);
    assert_eq!(body["queued"], 1);
    assert_eq!(body["skippedNotDue"], 1);
    assert_eq!(body["skippedAlreadyQueued"], 1);
    assert_eq!(body["failed"], 0);
    assert!(body["failedIds"].as_array().unwrap().is_empty());
}

#[test]
fn next_tick_lands_on_the_top_of_the_hour() {
    assert_eq!(
        duration_until_next_hour(utc("2024-01-15T13:00:00Z")),
        Duration::from_secs(3600)
    );
    assert_eq!(
        duration_until_next_hour(utc("2024-01-15T13:59:00Z")),
        Duration::from_secs(60)
    );
    assert_eq!(
        duration_until_next_hour(utc("2024-01-15T13:30:30Z")),
        Duration::from_secs(1770)
    );
    // Never a zero sleep, even right on the boundary second
    assert_eq!(
        duration_until_next_hour(utc("2024-01-15T13:59:59Z")),
        Duration::from_secs(1)
    );
}
