//! Store and locator seams used by the reconciler.
//!
//! [`GoogleCalendar`] binds a [`CalendarClient`] to one calendar ID and
//! implements both traits; tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::client::CalendarClient;
use crate::error::CalendarError;
use crate::types::{Event, EventDraft, EventPatch, EventQuery};

/// CRUD operations on events keyed by identifier.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Create an event; the store assigns its identifier.
    async fn create(&self, draft: &EventDraft) -> Result<Event, CalendarError>;

    async fn read(&self, event_id: &str) -> Result<Event, CalendarError>;

    /// Modify an event in place. Fails with `UpdateUnsupported` when the
    /// backend refuses the change for this event.
    async fn update(&self, event_id: &str, patch: &EventPatch) -> Result<Event, CalendarError>;

    async fn delete(&self, event_id: &str) -> Result<(), CalendarError>;

    /// Events matching the query, ordered by start time.
    async fn list(&self, query: &EventQuery) -> Result<Vec<Event>, CalendarError>;

    /// Calendar this store reads and writes.
    fn calendar_id(&self) -> &str;
}

/// Resolves search criteria to candidate events.
#[async_trait]
pub trait EventLocator: Send + Sync {
    async fn find(&self, query: &EventQuery) -> Result<Vec<Event>, CalendarError>;
}

/// Locate events through a store's list operation, dropping cancelled
/// instances that the API still returns for recurring series.
pub async fn locate<S: CalendarStore + ?Sized>(
    store: &S,
    query: &EventQuery,
) -> Result<Vec<Event>, CalendarError> {
    let mut events = store.list(query).await?;
    events.retain(|e| e.status != crate::types::EventStatus::Cancelled);
    tracing::debug!("Located {} events for {}", events.len(), query.describe());
    Ok(events)
}

/// A Google calendar reached through the REST client.
#[derive(Clone)]
pub struct GoogleCalendar {
    client: CalendarClient,
    calendar_id: String,
}

impl GoogleCalendar {
    pub fn new(client: CalendarClient, calendar_id: impl Into<String>) -> Self {
        Self {
            client,
            calendar_id: calendar_id.into(),
        }
    }

    pub fn client(&self) -> &CalendarClient {
        &self.client
    }
}

#[async_trait]
impl CalendarStore for GoogleCalendar {
    async fn create(&self, draft: &EventDraft) -> Result<Event, CalendarError> {
        self.client.create_event(&self.calendar_id, draft).await
    }

    async fn read(&self, event_id: &str) -> Result<Event, CalendarError> {
        self.client.get_event(&self.calendar_id, event_id).await
    }

    async fn update(&self, event_id: &str, patch: &EventPatch) -> Result<Event, CalendarError> {
        self.client
            .update_event(&self.calendar_id, event_id, patch)
            .await
    }

    async fn delete(&self, event_id: &str) -> Result<(), CalendarError> {
        self.client.delete_event(&self.calendar_id, event_id).await
    }

    async fn list(&self, query: &EventQuery) -> Result<Vec<Event>, CalendarError> {
        let response = self.client.list_events(&self.calendar_id, query, None).await?;
        Ok(response
            .items
            .into_iter()
            .map(|api_event| Event::from_api(api_event, &self.calendar_id))
            .collect())
    }

    fn calendar_id(&self) -> &str {
        &self.calendar_id
    }
}

#[async_trait]
impl EventLocator for GoogleCalendar {
    async fn find(&self, query: &EventQuery) -> Result<Vec<Event>, CalendarError> {
        locate(self, query).await
    }
}
