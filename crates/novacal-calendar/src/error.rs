//! Calendar-specific error types.

use novacal_core::{NetworkError, ReqwestErrorExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    /// The backend refuses to modify this event in place (recurring
    /// instances, events organized by someone else, special event types).
    #[error("Update not supported for this event: {0}")]
    UpdateUnsupported(String),

    #[error("Conflict: event was modified")]
    Conflict,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

impl From<reqwest::Error> for CalendarError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.into_network_error())
    }
}

impl CalendarError {
    /// User-friendly error message for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthRequired => "Please sign in to your Google account".to_string(),
            Self::TokenExpired => "Your session has expired. Please sign in again.".to_string(),
            Self::RateLimited(secs) => format!("Too many requests. Please wait {} seconds.", secs),
            Self::EventNotFound(_) => "Event not found".to_string(),
            Self::InvalidEventData(msg) => format!("Invalid event: {}", msg),
            Self::UpdateUnsupported(_) => "This event cannot be edited directly".to_string(),
            Self::Conflict => "The event was modified elsewhere. Please refresh.".to_string(),
            Self::ApiError(msg) => format!("Calendar error: {}", msg),
            Self::Network(e) => e.user_message().to_string(),
        }
    }

    /// Whether this error should trigger a token refresh.
    pub fn should_refresh_token(&self) -> bool {
        matches!(self, Self::TokenExpired | Self::AuthRequired)
    }

    /// Whether retrying the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Network(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether an update should fall back to create-then-delete.
    pub fn is_update_unsupported(&self) -> bool {
        matches!(self, Self::UpdateUnsupported(_))
    }
}
