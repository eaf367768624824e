//! Calendar API types and data structures.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar event as returned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub calendar_id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
    pub status: EventStatus,
    pub html_link: Option<String>,
    pub etag: Option<String>,
}

/// Event time - can be a specific datetime or an all-day date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    pub fn as_datetime(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// JSON shape used by the Calendar API (`dateTime` or `date`).
    pub fn to_api_value(&self) -> serde_json::Value {
        match self {
            EventTime::DateTime(dt) => serde_json::json!({ "dateTime": dt.to_rfc3339() }),
            EventTime::Date(d) => serde_json::json!({ "date": d.format("%Y-%m-%d").to_string() }),
        }
    }
}

/// Event status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

/// Full field set for creating an event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl EventDraft {
    pub fn new(summary: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Self {
            summary: summary.into(),
            start,
            end,
            description: None,
            location: None,
        }
    }

    /// Check the start < end invariant and that both ends are the same kind.
    pub fn validate(&self) -> Result<(), String> {
        check_order(&self.start, &self.end)
    }

    pub fn to_api_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "summary": self.summary,
            "start": self.start.to_api_value(),
            "end": self.end.to_api_value(),
        });

        if let Some(desc) = &self.description {
            body["description"] = serde_json::Value::String(desc.clone());
        }
        if let Some(loc) = &self.location {
            body["location"] = serde_json::Value::String(loc.clone());
        }

        body
    }
}

/// Partial update: only the fields that are `Some` change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.description.is_none()
            && self.location.is_none()
    }

    /// Check what can be checked without the current event.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("update does not change any field".to_string());
        }
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => check_order(start, end),
            _ => Ok(()),
        }
    }

    /// Merge this patch over an existing event, producing its full new state.
    pub fn apply_to(&self, event: &Event) -> EventDraft {
        EventDraft {
            summary: self.summary.clone().unwrap_or_else(|| event.summary.clone()),
            start: self.start.clone().unwrap_or_else(|| event.start.clone()),
            end: self.end.clone().unwrap_or_else(|| event.end.clone()),
            description: self.description.clone().or_else(|| event.description.clone()),
            location: self.location.clone().or_else(|| event.location.clone()),
        }
    }

    pub fn to_api_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();

        if let Some(s) = &self.summary {
            body.insert("summary".to_string(), serde_json::Value::String(s.clone()));
        }
        if let Some(s) = &self.start {
            body.insert("start".to_string(), s.to_api_value());
        }
        if let Some(e) = &self.end {
            body.insert("end".to_string(), e.to_api_value());
        }
        if let Some(d) = &self.description {
            body.insert("description".to_string(), serde_json::Value::String(d.clone()));
        }
        if let Some(l) = &self.location {
            body.insert("location".to_string(), serde_json::Value::String(l.clone()));
        }

        serde_json::Value::Object(body)
    }
}

fn check_order(start: &EventTime, end: &EventTime) -> Result<(), String> {
    if start.is_all_day() != end.is_all_day() {
        return Err("start and end must both be dates or both be times".to_string());
    }
    if start.as_datetime() < end.as_datetime() {
        Ok(())
    } else {
        Err("event must end after it starts".to_string())
    }
}

/// Filters for listing or searching events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Free-text search (`q`)
    pub keyword: Option<String>,
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
    pub max_results: u32,
}

impl EventQuery {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            max_results: 10,
            ..Self::default()
        }
    }

    pub fn between(time_min: DateTime<Utc>, time_max: DateTime<Utc>) -> Self {
        Self {
            time_min: Some(time_min),
            time_max: Some(time_max),
            max_results: 50,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_range(mut self, time_min: DateTime<Utc>, time_max: DateTime<Utc>) -> Self {
        self.time_min = Some(time_min);
        self.time_max = Some(time_max);
        self
    }

    /// Short human description, used in error messages.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(kw) = &self.keyword {
            parts.push(format!("'{}'", kw));
        }
        if let (Some(min), Some(max)) = (self.time_min, self.time_max) {
            parts.push(format!("between {} and {}", min.to_rfc3339(), max.to_rfc3339()));
        }
        if parts.is_empty() {
            "any event".to_string()
        } else {
            parts.join(" ")
        }
    }
}

// API Response Types

/// Google Calendar API event response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<ApiEventTime>,
    pub end: Option<ApiEventTime>,
    pub status: Option<String>,
    pub html_link: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub time_zone: Option<String>,
}

/// API response for event list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<ApiEvent>,
    pub next_page_token: Option<String>,
}

/// Error envelope returned by Google APIs.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorItem {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Event {
    /// Convert API response to local Event.
    pub fn from_api(api: ApiEvent, calendar_id: &str) -> Self {
        let (start, all_day) = api
            .start
            .map(|t| parse_event_time(&t))
            .unwrap_or((EventTime::DateTime(Utc::now()), false));

        let end = api
            .end
            .map(|t| parse_event_time(&t).0)
            .unwrap_or_else(|| start.clone());

        let status = match api.status.as_deref() {
            Some("confirmed") => EventStatus::Confirmed,
            Some("tentative") => EventStatus::Tentative,
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        };

        Self {
            id: api.id,
            calendar_id: calendar_id.to_string(),
            summary: api.summary.unwrap_or_default(),
            description: api.description,
            location: api.location,
            start,
            end,
            all_day,
            status,
            html_link: api.html_link,
            etag: api.etag,
        }
    }

    /// Summary for display; untitled events get a placeholder.
    pub fn title(&self) -> &str {
        if self.summary.trim().is_empty() {
            "Untitled Event"
        } else {
            &self.summary
        }
    }
}

fn parse_event_time(api: &ApiEventTime) -> (EventTime, bool) {
    if let Some(dt_str) = &api.date_time {
        if let Ok(dt) = DateTime::parse_from_rfc3339(dt_str) {
            return (EventTime::DateTime(dt.with_timezone(&Utc)), false);
        }
    }
    if let Some(date_str) = &api.date {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            return (EventTime::Date(date), true);
        }
    }
    (EventTime::DateTime(Utc::now()), false)
}
