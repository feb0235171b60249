use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use wisher::app::utils::occurrence::{
    anniversary_in_year, is_birthday_on, is_same_local_date, local_today, next_occurrence,
    resolve_send_instant,
};

fn utc(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().expect("valid RFC 3339 instant")
}

fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid date")
}

fn tz(s: &str) -> Tz {
    s.parse().expect("valid IANA zone")
}

#[test]
fn occurrence_on_the_birthday_in_new_york() {
    // 13:00 UTC on Jan 15 is 08:00 in New York, before the send hour.
    let now = utc("2024-01-15T13:00:00Z");

    let occurrence = next_occurrence(1, 15, tz("America/New_York"), 9, now).unwrap();

    assert_eq!(occurrence.local_date, date("2024-01-15"));
    assert_eq!(occurrence.scheduled_for, utc("2024-01-15T14:00:00Z"));
}

#[test]
fn occurrence_rolls_to_next_year_once_passed() {
    let now = utc("2024-02-01T00:00:00Z");

    let occurrence = next_occurrence(1, 15, tz("America/New_York"), 9, now).unwrap();

    assert_eq!(occurrence.local_date, date("2025-01-15"));
    // EST in January: UTC-5
    assert_eq!(occurrence.scheduled_for, utc("2025-01-15T14:00:00Z"));
}

#[test]
fn occurrence_on_dst_spring_forward_day() {
    // 2024-03-10 is the US spring-forward date; 09:00 exists and is EDT.
    let now = utc("2024-03-01T00:00:00Z");

    let occurrence = next_occurrence(3, 10, tz("America/New_York"), 9, now).unwrap();

    assert_eq!(occurrence.local_date, date("2024-03-10"));
    assert_eq!(occurrence.scheduled_for, utc("2024-03-10T13:00:00Z"));
}

#[test]
fn leap_day_birthday_observed_on_feb_28_in_non_leap_year() {
    let now = utc("2025-01-01T00:00:00Z");

    let occurrence = next_occurrence(2, 29, tz("UTC"), 9, now).unwrap();

    assert_eq!(occurrence.local_date, date("2025-02-28"));
    assert_eq!(occurrence.scheduled_for, utc("2025-02-28T09:00:00Z"));
}

#[test]
fn leap_day_birthday_kept_on_feb_29_in_leap_year() {
    let now = utc("2024-01-01T00:00:00Z");

    let occurrence = next_occurrence(2, 29, tz("UTC"), 9, now).unwrap();

    assert_eq!(occurrence.local_date, date("2024-02-29"));
}

#[test]
fn dst_gap_picks_first_valid_instant_after_the_wall_time() {
    // 02:00 on 2024-03-10 does not exist in New York; the clock jumps from
    // 02:00 EST to 03:00 EDT, which is 07:00 UTC.
    let instant = resolve_send_instant(date("2024-03-10"), tz("America/New_York"), 2).unwrap();

    assert_eq!(instant, utc("2024-03-10T07:00:00Z"));
}

#[test]
fn dst_fold_picks_the_earlier_instant() {
    // 01:00 on 2024-11-03 happens twice in New York; the EDT reading comes
    // first at 05:00 UTC.
    let instant = resolve_send_instant(date("2024-11-03"), tz("America/New_York"), 1).unwrap();

    assert_eq!(instant, utc("2024-11-03T05:00:00Z"));
}

#[test]
fn anniversary_resolution_handles_leap_and_plain_dates() {
    assert_eq!(anniversary_in_year(2025, 2, 29), Some(date("2025-02-28")));
    assert_eq!(anniversary_in_year(2024, 2, 29), Some(date("2024-02-29")));
    assert_eq!(anniversary_in_year(2025, 6, 1), Some(date("2025-06-01")));
}

#[test]
fn birthday_matching_observes_leap_day_promotion() {
    let leap_born = date("2000-02-29");

    assert!(is_birthday_on(leap_born, date("2025-02-28")));
    assert!(is_birthday_on(leap_born, date("2024-02-29")));
    assert!(!is_birthday_on(leap_born, date("2024-02-28")));
}

#[test]
fn local_date_checks_respect_the_zone() {
    // 03:00 UTC on Jan 16 is still Jan 15 in New York.
    let instant = utc("2024-01-16T03:00:00Z");
    let new_york = tz("America/New_York");

    assert_eq!(local_today(new_york, instant), date("2024-01-15"));
    assert!(is_same_local_date(instant, new_york, date("2024-01-15")));
    assert!(!is_same_local_date(instant, new_york, date("2024-01-16")));
    assert!(is_same_local_date(instant, tz("UTC"), date("2024-01-16")));
}
