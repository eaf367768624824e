//! A chat session: transcript, conversational memory and the calendar
//! executor that carries out requests.

use anyhow::{Context, Result};
use chrono::Duration;
use chrono_tz::Tz;

use novacal_calendar::context::{Role, Turn};
use novacal_calendar::time::{parse_event_time, today};
use novacal_calendar::{
    collect_agenda, feed_entries, format_agenda, format_matches, locate, with_retry,
    CalendarClient, CalendarError, CalendarStore, ConversationContext, EventDraft, EventPatch,
    EventQuery, EventTime, GoogleCalendar, ReconcileError, Reconciler, RetryConfig, SwapOutcome,
};
use novacal_core::Config;

use crate::cli::{Action, Changes, NewEvent};

/// Most events the visual feed pulls in one request.
const FEED_LIMIT: u32 = 2500;

/// Calendar handles bound to one access token.
///
/// Dropped on reset or token change; nothing from the previous connection
/// outlives it.
pub struct Executor {
    calendar: GoogleCalendar,
    agenda: Vec<GoogleCalendar>,
    retry: RetryConfig,
    tz: Tz,
    search_limit: u32,
    agenda_limit: u32,
}

impl Executor {
    pub fn new(config: &Config, access_token: &str) -> Result<Self> {
        let tz = config.calendar.tz()?;
        let client = CalendarClient::new_with_base_url(access_token, &config.calendar.api_base_url);
        let agenda = config
            .calendar
            .agenda_calendars
            .iter()
            .map(|id| GoogleCalendar::new(client.clone(), id.as_str()))
            .collect();

        tracing::debug!("Calendar executor ready for {}", config.calendar.calendar_id);
        Ok(Self {
            calendar: GoogleCalendar::new(client, config.calendar.calendar_id.as_str()),
            agenda,
            retry: RetryConfig::from(&config.retry),
            tz,
            search_limit: config.calendar.search_limit,
            agenda_limit: config.calendar.agenda_limit,
        })
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        tracing::debug!("Calendar executor for {} torn down", self.calendar.calendar_id());
    }
}

pub struct Session {
    config: Config,
    access_token: Option<String>,
    context: ConversationContext,
    transcript: Vec<Turn>,
    executor: Option<Executor>,
}

impl Session {
    pub fn new(config: Config, access_token: Option<String>) -> Self {
        Self {
            config,
            access_token,
            context: ConversationContext::new(),
            transcript: Vec::new(),
            executor: None,
        }
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    #[cfg(test)]
    fn context(&self) -> &ConversationContext {
        &self.context
    }

    #[cfg(test)]
    fn has_executor(&self) -> bool {
        self.executor.is_some()
    }

    /// Drop the visible transcript; conversational memory is kept.
    pub fn clear_display(&mut self) {
        self.transcript.clear();
        tracing::info!("Transcript cleared, memory retained");
    }

    /// Forget the transcript, the conversational memory and the executor.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.context.clear();
        self.executor = None;
        tracing::info!("Session reset");
    }

    /// Switch credentials. Anything built on the old token is discarded.
    pub fn set_access_token(&mut self, access_token: impl Into<String>) {
        self.access_token = Some(access_token.into());
        self.reset();
    }

    /// Handle one request, recording it in the transcript and memory.
    pub async fn handle(&mut self, request: &str, action: &Action) -> Result<String> {
        self.record(Role::User, request);
        let result = self.run(action).await;
        let reply = match &result {
            Ok(text) => text.clone(),
            Err(e) => format!("{}", e),
        };
        self.record(Role::Assistant, &reply);
        result
    }

    fn record(&mut self, role: Role, content: &str) {
        let turn = Turn {
            role,
            content: content.to_string(),
        };
        match role {
            Role::User => self.context.push_user(content),
            Role::Assistant => self.context.push_assistant(content),
        }
        self.transcript.push(turn);
    }

    fn ensure_executor(&mut self) -> Result<()> {
        if self.executor.is_none() {
            let token = self
                .access_token
                .as_deref()
                .context("No Google access token; sign in or use set-token first")?;
            self.executor = Some(Executor::new(&self.config, token)?);
        }
        Ok(())
    }

    /// Run one calendar action and render the reply.
    pub async fn run(&mut self, action: &Action) -> Result<String> {
        self.ensure_executor()?;
        let Some(executor) = self.executor.as_ref() else {
            anyhow::bail!("Calendar executor unavailable");
        };
        let tz = executor.tz;

        let outcome = match action {
            Action::Agenda { from, to } => {
                let from = from.unwrap_or_else(|| today(tz));
                let to = to.unwrap_or(from);
                collect_agenda(
                    &executor.agenda,
                    from,
                    to,
                    tz,
                    executor.agenda_limit,
                    &executor.retry,
                )
                .await
                .map(|events| format_agenda(&events, from, to, tz))
                .map_err(|e| friendly(e.user_message(), e))
            }
            Action::Find { keyword } => {
                let query = EventQuery::keyword(keyword.as_str()).with_limit(executor.search_limit);
                let calendar = &executor.calendar;
                match with_retry(&executor.retry, "search", || locate(calendar, &query)).await {
                    Ok(events) => {
                        if let [only] = events.as_slice() {
                            self.context.note_event(only.id.clone());
                        }
                        Ok(format_matches(keyword, &events, tz))
                    }
                    Err(e) => Err(friendly(e.user_message(), e)),
                }
            }
            Action::Create { event } => {
                let draft = to_draft(event, tz)?;
                let calendar = &executor.calendar;
                match with_retry(&executor.retry, "create", || calendar.create(&draft)).await {
                    Ok(created) => {
                        tracing::info!("Created event {}", created.id);
                        self.context.note_event(created.id.clone());
                        Ok(format!("Created '{}' (EVENT_ID: {}).", created.title(), created.id))
                    }
                    Err(e) => Err(friendly(e.user_message(), e)),
                }
            }
            Action::Delete { id } => Reconciler::new(&executor.calendar)
                .with_retry(executor.retry.clone())
                .remove(&mut self.context, id)
                .await
                .map(|removed| format!("Deleted event {}.", removed))
                .map_err(|e| friendly(e.user_message(), e)),
            Action::DeleteMatching { keyword } => {
                let query = EventQuery::keyword(keyword.as_str()).with_limit(executor.search_limit);
                Reconciler::new(&executor.calendar)
                    .with_retry(executor.retry.clone())
                    .remove_matching(&mut self.context, &executor.calendar, &query)
                    .await
                    .map(|removed| format!("Deleted event {}.", removed))
                    .map_err(|e| friendly(e.user_message(), e))
            }
            Action::Update { id, changes } => {
                let patch = to_patch(changes, tz)?;
                Reconciler::new(&executor.calendar)
                    .with_retry(executor.retry.clone())
                    .reconcile(&mut self.context, id, &patch)
                    .await
                    .map(|outcome| describe_outcome(&outcome))
                    .map_err(|e| friendly(e.user_message(), e))
            }
            Action::UpdateMatching { keyword, changes } => {
                let patch = to_patch(changes, tz)?;
                let query = EventQuery::keyword(keyword.as_str()).with_limit(executor.search_limit);
                Reconciler::new(&executor.calendar)
                    .with_retry(executor.retry.clone())
                    .reconcile_matching(&mut self.context, &executor.calendar, &query, &patch)
                    .await
                    .map(|outcome| describe_outcome(&outcome))
                    .map_err(|e| friendly(e.user_message(), e))
            }
            Action::Export => {
                let query = EventQuery::default().with_limit(FEED_LIMIT);
                let calendar = &executor.calendar;
                match with_retry(&executor.retry, "export", || locate(calendar, &query)).await {
                    Ok(events) => serde_json::to_string_pretty(&feed_entries(&events, tz))
                        .context("Failed to serialize calendar feed"),
                    Err(e) => Err(friendly(e.user_message(), e)),
                }
            }
        };

        if let Err(e) = &outcome {
            tracing::error!("{:#}", e);
        }
        if outcome.as_ref().is_err_and(needs_reauth) {
            // The token no longer works; build a fresh executor next time
            self.executor = None;
        }
        outcome
    }
}

/// Show the user-facing message, keep the detailed error as the cause.
fn friendly<E>(message: String, error: E) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    anyhow::Error::new(error).context(message)
}

fn needs_reauth(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<CalendarError>()
            .is_some_and(|e| e.should_refresh_token())
            || cause
                .downcast_ref::<ReconcileError>()
                .is_some_and(|e| e.requires_reauth())
    })
}

fn to_patch(changes: &Changes, tz: Tz) -> Result<EventPatch> {
    let parse = |value: &Option<String>, is_end: bool| -> Result<_> {
        value
            .as_deref()
            .map(|s| parse_time(s, tz, is_end))
            .transpose()
    };

    Ok(EventPatch {
        summary: changes.title.clone(),
        start: parse(&changes.start, false)?,
        end: parse(&changes.end, true)?,
        description: changes.description.clone(),
        location: changes.location.clone(),
    })
}

fn to_draft(event: &NewEvent, tz: Tz) -> Result<EventDraft> {
    let start = parse_time(&event.start, tz, false)?;
    let end = match &event.end {
        Some(end) => parse_time(end, tz, true)?,
        None => default_end(&start)?,
    };

    let draft = EventDraft {
        description: event.description.clone(),
        location: event.location.clone(),
        ..EventDraft::new(event.title.as_str(), start, end)
    };
    draft
        .validate()
        .map_err(|msg| anyhow::anyhow!("That event is not valid: {}", msg))?;
    Ok(draft)
}

/// Parse a user-supplied time. A date-only end names the last day covered;
/// the store expects the day after.
fn parse_time(input: &str, tz: Tz, is_end: bool) -> Result<EventTime> {
    match parse_event_time(input, tz).map_err(anyhow::Error::msg)? {
        EventTime::Date(day) if is_end => day
            .succ_opt()
            .map(EventTime::Date)
            .with_context(|| format!("{} is out of range", day)),
        time => Ok(time),
    }
}

fn default_end(start: &EventTime) -> Result<EventTime> {
    match start {
        EventTime::DateTime(at) => Ok(EventTime::DateTime(*at + Duration::hours(1))),
        EventTime::Date(day) => day
            .succ_opt()
            .map(EventTime::Date)
            .with_context(|| format!("{} is out of range", day)),
    }
}

fn describe_outcome(outcome: &SwapOutcome) -> String {
    match outcome {
        SwapOutcome::UpdatedInPlace { event } => {
            format!("Updated '{}' (EVENT_ID: {}).", event.title(), event.id)
        }
        SwapOutcome::SwappedViaRecreate { previous_id, event } => format!(
            "Updated '{}'. The event was recreated, so its EVENT_ID changed from {} to {}.",
            event.title(),
            previous_id,
            event.id
        ),
    }
}
