//! Helpers for `YYYYMMDD` dates (UTC) as stored in the charts database.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

pub const SECS_PER_DAY: i64 = 24 * 60 * 60;

fn from_naive(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

fn to_naive(date: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt((date / 10_000) as i32, (date / 100) % 100, date % 100)
}

/// The UTC calendar date of a unix timestamp.
pub fn date_of(timestamp: i64) -> u32 {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| from_naive(dt.date_naive()))
        .unwrap_or(0)
}

pub fn today() -> u32 {
    from_naive(Utc::now().date_naive())
}

/// `date` moved back by `days` calendar days.
pub fn days_before(date: u32, days: u32) -> u32 {
    to_naive(date)
        .and_then(|d| d.checked_sub_signed(Duration::days(days as i64)))
        .map(from_naive)
        .unwrap_or(0)
}

/// Whole days from `date` to `as_of`; `None` when `date` is after `as_of`.
pub fn day_offset(date: u32, as_of: u32) -> Option<u32> {
    let days = (to_naive(as_of)? - to_naive(date)?).num_days();
    u32::try_from(days).ok()
}

/// Unix timestamp of midnight UTC at the start of `date`.
pub fn start_of_day(date: u32) -> i64 {
    to_naive(date)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}
