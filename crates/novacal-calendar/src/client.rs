//! Google Calendar API client.

use reqwest::StatusCode;
use tracing::instrument;

use novacal_core::NetworkError;

use crate::error::CalendarError;
use crate::types::*;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Error reasons for which the API refuses an in-place modification but a
/// freshly created event is accepted.
const UPDATE_UNSUPPORTED_REASONS: &[&str] = &[
    "forbiddenForNonOrganizer",
    "cannotChangeOrganizer",
    "cannotChangeOrganizerOfInstance",
    "eventTypeRestriction",
];

const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

#[derive(Clone)]
pub struct CalendarClient {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl CalendarClient {
    pub fn new(access_token: &str) -> Self {
        Self::new_with_base_url(access_token, CALENDAR_API_BASE)
    }

    pub fn new_with_base_url(access_token: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id),
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id),
        )
    }

    /// List events from a calendar, expanding recurring events into instances.
    #[instrument(skip(self), level = "info")]
    pub async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
        page_token: Option<&str>,
    ) -> Result<EventListResponse, CalendarError> {
        let mut url = format!(
            "{}?singleEvents=true&orderBy=startTime&maxResults={}",
            self.events_url(calendar_id),
            query.max_results.max(1),
        );

        if let Some(min) = query.time_min {
            url.push_str(&format!("&timeMin={}", urlencoding::encode(&min.to_rfc3339())));
        }
        if let Some(max) = query.time_max {
            url.push_str(&format!("&timeMax={}", urlencoding::encode(&max.to_rfc3339())));
        }
        if let Some(keyword) = &query.keyword {
            url.push_str(&format!("&q={}", urlencoding::encode(keyword)));
        }
        if let Some(pt) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(pt)));
        }

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a single event.
    #[instrument(skip(self), level = "info")]
    pub async fn get_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<Event, CalendarError> {
        let response = self
            .client
            .get(self.event_url(calendar_id, event_id))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let api_event: ApiEvent = self.handle_response(response).await?;
        Ok(Event::from_api(api_event, calendar_id))
    }

    /// Create a new event.
    #[instrument(skip(self), level = "info")]
    pub async fn create_event(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<Event, CalendarError> {
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .header("Authorization", self.auth_header())
            .json(&draft.to_api_body())
            .send()
            .await?;

        let api_event: ApiEvent = self.handle_response(response).await?;
        Ok(Event::from_api(api_event, calendar_id))
    }

    /// Update an existing event in place (PATCH semantics).
    #[instrument(skip(self), level = "info")]
    pub async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<Event, CalendarError> {
        let response = self
            .client
            .patch(self.event_url(calendar_id, event_id))
            .header("Authorization", self.auth_header())
            .json(&patch.to_api_body())
            .send()
            .await?;

        let api_event: ApiEvent = self.handle_response(response).await?;
        Ok(Event::from_api(api_event, calendar_id))
    }

    /// Delete an event.
    #[instrument(skip(self), level = "info")]
    pub async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(self.event_url(calendar_id, event_id))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        // Delete returns 204 No Content on success
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CalendarError> {
        if response.status().is_success() {
            response.json().await.map_err(|e| {
                CalendarError::Network(NetworkError::InvalidResponse(format!(
                    "JSON parse error: {}",
                    e
                )))
            })
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn error_from_response(response: reqwest::Response) -> CalendarError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let text = response.text().await.unwrap_or_default();
        classify_error(status, &text, retry_after)
    }
}

/// Map a failed API response onto a [`CalendarError`].
///
/// Google reports several distinct conditions under the same status code
/// (403 is used for permission problems, rate limits and organizer-only
/// edits), so the `reason` of the first error item takes precedence.
pub fn classify_error(status: StatusCode, body: &str, retry_after: Option<u64>) -> CalendarError {
    let parsed = serde_json::from_str::<ApiErrorResponse>(body).ok();
    let reason = parsed
        .as_ref()
        .and_then(|p| p.error.errors.first())
        .map(|e| e.reason.as_str())
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .map(|p| p.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    if RATE_LIMIT_REASONS.contains(&reason) || status == StatusCode::TOO_MANY_REQUESTS {
        return CalendarError::RateLimited(retry_after.unwrap_or(60));
    }

    if UPDATE_UNSUPPORTED_REASONS.contains(&reason)
        || status == StatusCode::METHOD_NOT_ALLOWED
        || status == StatusCode::NOT_IMPLEMENTED
    {
        return CalendarError::UpdateUnsupported(message);
    }

    match status {
        StatusCode::UNAUTHORIZED => CalendarError::TokenExpired,
        StatusCode::FORBIDDEN => CalendarError::AuthRequired,
        StatusCode::NOT_FOUND | StatusCode::GONE => CalendarError::EventNotFound(message),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => CalendarError::Conflict,
        StatusCode::BAD_REQUEST => CalendarError::InvalidEventData(message),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            CalendarError::Network(NetworkError::ServerError {
                status: s.as_u16(),
                message,
            })
        }
        s => CalendarError::ApiError(format!("{}: {}", s, message)),
    }
}
