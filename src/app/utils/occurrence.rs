use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// A resolved birthday occurrence: the local calendar date it falls on and
/// the UTC instant at which the recipient's wall clock reads the send hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub local_date: NaiveDate,
    pub scheduled_for: DateTime<Utc>,
}

/// Compute the next occurrence of a (month, day) anniversary in `tz`, on or
/// after today as seen from that zone.
///
/// A February 29 anniversary is observed on February 28 in non-leap years.
pub fn next_occurrence(
    birth_month: u32,
    birth_day: u32,
    tz: Tz,
    send_hour: u32,
    now_utc: DateTime<Utc>,
) -> Option<Occurrence> {
    let today = local_today(tz, now_utc);

    let this_year = anniversary_in_year(today.year(), birth_month, birth_day)?;
    let local_date = if this_year >= today {
        this_year
    } else {
        anniversary_in_year(today.year() + 1, birth_month, birth_day)?
    };

    let scheduled_for = resolve_send_instant(local_date, tz, send_hour)?;
    Some(Occurrence { local_date, scheduled_for })
}

/// The calendar date a (month, day) anniversary is observed on in `year`.
pub fn anniversary_in_year(year: i32, birth_month: u32, birth_day: u32) -> Option<NaiveDate> {
    match NaiveDate::from_ymd_opt(year, birth_month, birth_day) {
        Some(date) => Some(date),
        // Feb 29 in a non-leap year is observed on Feb 28
        None if birth_month == 2 && birth_day == 29 => NaiveDate::from_ymd_opt(year, 2, 28),
        None => None,
    }
}

/// Project `send_hour`:00 local on `date` in `tz` to UTC.
///
/// A DST gap (spring forward) skips the wall-clock time entirely; the first
/// valid instant at or after it is used. A DST fold (fall back) makes the
/// wall-clock time occur twice; the earlier instant is used.
pub fn resolve_send_instant(date: NaiveDate, tz: Tz, send_hour: u32) -> Option<DateTime<Utc>> {
    let mut wall = date.and_hms_opt(send_hour, 0, 0)?;

    // Gaps are at most a few hours wide; step forward minute by minute until
    // the wall-clock time exists.
    for _ in 0..=(24 * 60) {
        match tz.from_local_datetime(&wall) {
            LocalResult::Single(local) => return Some(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, _later) => return Some(earlier.with_timezone(&Utc)),
            LocalResult::None => wall = wall + Duration::minutes(1),
        }
    }

    None
}

/// Today's calendar date as seen from `tz`.
pub fn local_today(tz: Tz, now_utc: DateTime<Utc>) -> NaiveDate {
    now_utc.with_timezone(&tz).date_naive()
}

/// Whether `utc_instant` falls on local calendar date `date` in `tz`.
pub fn is_same_local_date(utc_instant: DateTime<Utc>, tz: Tz, date: NaiveDate) -> bool {
    utc_instant.with_timezone(&tz).date_naive() == date
}

/// Whether a recipient born on `birthdate` has their birthday on local date
/// `date`, observing Feb 29 birthdays on Feb 28 in non-leap years.
pub fn is_birthday_on(birthdate: NaiveDate, date: NaiveDate) -> bool {
    anniversary_in_year(date.year(), birthdate.month(), birthdate.day()) == Some(date)
}
