//! Timezone-aware parsing and day boundaries.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::types::EventTime;

/// Parse a user-supplied time.
///
/// Accepted forms:
/// - RFC 3339 with offset (`2024-06-01T14:00:00+07:00`, seconds optional)
/// - local wall time in `tz` (`2024-06-01 14:00` or `2024-06-01T14:00`)
/// - a bare date (`2024-06-01`), meaning an all-day event
pub fn parse_event_time(input: &str, tz: Tz) -> Result<EventTime, String> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(EventTime::DateTime(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M%:z") {
        return Ok(EventTime::DateTime(dt.with_timezone(&Utc)));
    }

    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return localize(tz, naive)
                .map(EventTime::DateTime)
                .ok_or_else(|| format!("{} does not exist in {}", input, tz));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(EventTime::Date(date));
    }

    Err(format!(
        "Unrecognized time '{}'; use YYYY-MM-DD, 'YYYY-MM-DD HH:MM' or RFC 3339",
        input
    ))
}

/// Interpret a wall-clock time in `tz`. Ambiguous times (DST fall-back) take
/// the earlier instant; times inside a DST gap do not exist.
fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// First instant of `date` in `tz`.
pub fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    // Some zones skip midnight on DST day; step forward until the clock exists
    (0..=3)
        .find_map(|h| localize(tz, midnight + Duration::hours(h)))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Half-open UTC range covering the days `from..=to` in `tz`.
pub fn day_range(
    tz: Tz,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    if to < from {
        return Err(format!("End date {} is before start date {}", to, from));
    }
    let next = to
        .succ_opt()
        .ok_or_else(|| format!("Date {} is out of range", to))?;
    Ok((start_of_day(tz, from), start_of_day(tz, next)))
}

/// Calendar date of an event time as seen in `tz`.
pub fn local_date(time: &EventTime, tz: Tz) -> NaiveDate {
    match time {
        EventTime::Date(d) => *d,
        EventTime::DateTime(dt) => dt.with_timezone(&tz).date_naive(),
    }
}

/// `HH:MM` of an event time in `tz`; `None` for all-day times.
pub fn local_clock(time: &EventTime, tz: Tz) -> Option<String> {
    match time {
        EventTime::Date(_) => None,
        EventTime::DateTime(dt) => Some(dt.with_timezone(&tz).format("%H:%M").to_string()),
    }
}

/// Today's date in `tz`.
pub fn today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}
