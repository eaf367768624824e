//! Agenda, search listings and the visual calendar feed.
//!
//! The text renderings are what the assistant shows (and what an LLM agent
//! reads back), so their line format is kept stable.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::CalendarError;
use crate::retry::{with_retry, RetryConfig};
use crate::store::CalendarStore;
use crate::time::{day_range, local_clock, local_date};
use crate::types::{Event, EventQuery, EventTime};

/// Colour used for every event in the visual feed.
pub const FEED_COLOR: &str = "#FF4B4B";

/// Events from all `calendars` within the days `from..=to` in `tz`, sorted
/// by start time.
///
/// A calendar that fails to load is skipped with a warning, unless the
/// failure is an authentication problem, which would affect every calendar.
pub async fn collect_agenda<S: CalendarStore>(
    calendars: &[S],
    from: NaiveDate,
    to: NaiveDate,
    tz: Tz,
    limit: u32,
    retry: &RetryConfig,
) -> Result<Vec<Event>, CalendarError> {
    let (time_min, time_max) = day_range(tz, from, to).map_err(CalendarError::InvalidEventData)?;
    let query = EventQuery::between(time_min, time_max).with_limit(limit);

    let mut events = Vec::new();
    for calendar in calendars {
        match with_retry(retry, "agenda", || calendar.list(&query)).await {
            Ok(found) => events.extend(found),
            Err(e) if e.should_refresh_token() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Skipping calendar {} in agenda: {}",
                    calendar.calendar_id(),
                    e
                );
            }
        }
    }

    events.retain(|e| e.status != crate::types::EventStatus::Cancelled);
    events.sort_by_key(|e| e.start.as_datetime());
    Ok(events)
}

fn time_label(event: &Event, tz: Tz) -> String {
    match (local_clock(&event.start, tz), local_clock(&event.end, tz)) {
        (Some(start), Some(end)) => format!("{} - {}", start, end),
        _ => "All-day".to_string(),
    }
}

/// `Schedule from A to B:` followed by one line per event.
pub fn format_agenda(events: &[Event], from: NaiveDate, to: NaiveDate, tz: Tz) -> String {
    if events.is_empty() {
        return format!("No events scheduled from {} to {}.", from, to);
    }

    let mut out = format!("Schedule from {} to {}:\n", from, to);
    for event in events {
        out.push_str(&format!(
            "- [{}] {} ({})\n",
            local_date(&event.start, tz),
            event.title(),
            time_label(event, tz)
        ));
    }
    out
}

/// Search results including event IDs, so a follow-up edit can name one.
pub fn format_matches(keyword: &str, events: &[Event], tz: Tz) -> String {
    if events.is_empty() {
        return format!("No events found matching the keyword: '{}'.", keyword);
    }

    let mut out = format!("Matching Events Found for '{}':\n", keyword);
    for event in events {
        out.push_str(&format!(
            "- [{}] '{}' ({}) | EVENT_ID: {}\n",
            local_date(&event.start, tz),
            event.title(),
            time_label(event, tz),
            event.id
        ));
    }
    out
}

/// One entry of a FullCalendar event source.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub title: String,
    pub start: String,
    pub end: String,
    pub background_color: String,
    pub border_color: String,
}

fn feed_time(time: &EventTime, tz: Tz) -> String {
    match time {
        EventTime::Date(d) => d.format("%Y-%m-%d").to_string(),
        EventTime::DateTime(dt) => dt.with_timezone(&tz).to_rfc3339(),
    }
}

/// Events in the shape FullCalendar expects, with times shown in `tz`.
pub fn feed_entries(events: &[Event], tz: Tz) -> Vec<FeedEntry> {
    events
        .iter()
        .map(|event| FeedEntry {
            title: event.title().to_string(),
            start: feed_time(&event.start, tz),
            end: feed_time(&event.end, tz),
            background_color: FEED_COLOR.to_string(),
            border_color: FEED_COLOR.to_string(),
        })
        .collect()
}
