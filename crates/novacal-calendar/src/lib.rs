//! Google Calendar integration for NovaCal.
//!
//! Provides the Calendar API client, the store/locator seams, and the
//! reconciler that applies updates with a create-then-delete fallback.

pub mod agenda;
pub mod client;
pub mod context;
pub mod error;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod time;
pub mod types;

pub use agenda::{collect_agenda, feed_entries, format_agenda, format_matches, FeedEntry};
pub use client::CalendarClient;
pub use context::ConversationContext;
pub use error::CalendarError;
pub use reconcile::{ReconcileError, Reconciler, Stage, SwapOutcome};
pub use retry::{with_retry, RetryConfig};
pub use store::{locate, CalendarStore, EventLocator, GoogleCalendar};
pub use types::{Event, EventDraft, EventPatch, EventQuery, EventStatus, EventTime};
