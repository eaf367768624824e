//! End-to-end behavior of the reconciler against an in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use novacal_calendar::{
    locate, CalendarError, CalendarStore, ConversationContext, Event, EventDraft, EventLocator,
    EventPatch, EventQuery, EventStatus, EventTime, ReconcileError, Reconciler, RetryConfig,
    Stage, SwapOutcome,
};
use novacal_core::NetworkError;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create(String),
    Read(String),
    Update(String),
    Delete(String),
    List,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Unsupported,
    Conflict,
    Expired,
    Timeout,
}

impl Failure {
    fn to_error(self) -> CalendarError {
        match self {
            Failure::Unsupported => {
                CalendarError::UpdateUnsupported("forbiddenForNonOrganizer".to_string())
            }
            Failure::Conflict => CalendarError::Conflict,
            Failure::Expired => CalendarError::TokenExpired,
            Failure::Timeout => CalendarError::Network(NetworkError::Timeout),
        }
    }
}

#[derive(Default)]
struct State {
    events: BTreeMap<String, Event>,
    calls: Vec<Call>,
    next_id: u32,
    fail_update: Option<Failure>,
    fail_read: Option<Failure>,
    fail_create: Option<Failure>,
    fail_delete: Option<Failure>,
    /// Number of leading update calls that time out before succeeding
    flaky_updates: u32,
    /// Number of leading create calls that time out without creating anything
    flaky_creates: u32,
    /// Number of leading delete calls that remove the event but then time out
    lossy_deletes: u32,
}

struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 456,
                ..State::default()
            }),
        }
    }

    fn with_event(self, id: &str, summary: &str, start: &str, end: &str) -> Self {
        let event = Event {
            id: id.to_string(),
            calendar_id: "primary".to_string(),
            summary: summary.to_string(),
            description: Some("bring x-rays".to_string()),
            location: Some("Clinic".to_string()),
            start: EventTime::DateTime(utc(start)),
            end: EventTime::DateTime(utc(end)),
            all_day: false,
            status: EventStatus::Confirmed,
            html_link: None,
            etag: None,
        };
        self.state.lock().events.insert(id.to_string(), event);
        self
    }

    fn configure(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock());
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    fn event(&self, id: &str) -> Option<Event> {
        self.state.lock().events.get(id).cloned()
    }

    fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }
}

#[async_trait]
impl CalendarStore for FakeStore {
    async fn create(&self, draft: &EventDraft) -> Result<Event, CalendarError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Create(draft.summary.clone()));
        if state.flaky_creates > 0 {
            state.flaky_creates -= 1;
            return Err(Failure::Timeout.to_error());
        }
        if let Some(failure) = state.fail_create {
            return Err(failure.to_error());
        }

        let id = format!("evt_{}", state.next_id);
        state.next_id += 1;
        let event = Event {
            id: id.clone(),
            calendar_id: "primary".to_string(),
            summary: draft.summary.clone(),
            description: draft.description.clone(),
            location: draft.location.clone(),
            start: draft.start.clone(),
            end: draft.end.clone(),
            all_day: draft.start.is_all_day(),
            status: EventStatus::Confirmed,
            html_link: None,
            etag: None,
        };
        state.events.insert(id, event.clone());
        Ok(event)
    }

    async fn read(&self, event_id: &str) -> Result<Event, CalendarError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Read(event_id.to_string()));
        if let Some(failure) = state.fail_read {
            return Err(failure.to_error());
        }
        state
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| CalendarError::EventNotFound(event_id.to_string()))
    }

    async fn update(&self, event_id: &str, patch: &EventPatch) -> Result<Event, CalendarError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Update(event_id.to_string()));
        if state.flaky_updates > 0 {
            state.flaky_updates -= 1;
            return Err(Failure::Timeout.to_error());
        }
        if let Some(failure) = state.fail_update {
            return Err(failure.to_error());
        }

        let current = state
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| CalendarError::EventNotFound(event_id.to_string()))?;
        let draft = patch.apply_to(&current);
        let updated = Event {
            summary: draft.summary,
            description: draft.description,
            location: draft.location,
            start: draft.start,
            end: draft.end,
            ..current
        };
        state.events.insert(event_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, event_id: &str) -> Result<(), CalendarError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete(event_id.to_string()));
        if let Some(failure) = state.fail_delete {
            return Err(failure.to_error());
        }
        if state.lossy_deletes > 0 {
            state.lossy_deletes -= 1;
            state.events.remove(event_id);
            return Err(Failure::Timeout.to_error());
        }
        state
            .events
            .remove(event_id)
            .map(|_| ())
            .ok_or_else(|| CalendarError::EventNotFound(event_id.to_string()))
    }

    async fn list(&self, query: &EventQuery) -> Result<Vec<Event>, CalendarError> {
        let mut state = self.state.lock();
        state.calls.push(Call::List);
        let keyword = query.keyword.clone().unwrap_or_default().to_lowercase();
        let mut found: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.summary.to_lowercase().contains(&keyword))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.start.as_datetime());
        found.truncate(query.max_results as usize);
        Ok(found)
    }

    fn calendar_id(&self) -> &str {
        "primary"
    }
}

#[async_trait]
impl EventLocator for FakeStore {
    async fn find(&self, query: &EventQuery) -> Result<Vec<Event>, CalendarError> {
        locate(self, query).await
    }
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new(2, 1, 5)
}

fn move_to_afternoon() -> EventPatch {
    EventPatch {
        start: Some(EventTime::DateTime(utc("2024-06-01T14:00:00+07:00"))),
        end: Some(EventTime::DateTime(utc("2024-06-01T15:00:00+07:00"))),
        ..EventPatch::default()
    }
}

fn dentist_store() -> FakeStore {
    FakeStore::new().with_event(
        "evt_123",
        "Dentist",
        "2024-06-01T09:00:00+07:00",
        "2024-06-01T10:00:00+07:00",
    )
}

#[tokio::test]
async fn test_in_place_update_keeps_id() {
    let store = dentist_store();
    let mut ctx = ConversationContext::new();

    let outcome = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();

    assert!(matches!(outcome, SwapOutcome::UpdatedInPlace { .. }));
    assert_eq!(outcome.event_id(), "evt_123");
    assert_eq!(store.calls(), vec![Call::Update("evt_123".into())]);
    assert_eq!(
        store.event("evt_123").unwrap().start,
        EventTime::DateTime(utc("2024-06-01T07:00:00Z"))
    );
    assert_eq!(ctx.last_event_id(), Some("evt_123"));
}

#[tokio::test]
async fn test_unsupported_update_swaps_create_then_delete() {
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Unsupported));
    let mut ctx = ConversationContext::new();

    let outcome = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();

    match &outcome {
        SwapOutcome::SwappedViaRecreate { previous_id, event } => {
            assert_eq!(previous_id, "evt_123");
            assert_eq!(event.id, "evt_456");
        }
        other => panic!("expected a swap, got {:?}", other),
    }
    assert!(outcome.was_swapped());

    // Exactly one create, then one delete of the original
    assert_eq!(
        store.calls(),
        vec![
            Call::Update("evt_123".into()),
            Call::Read("evt_123".into()),
            Call::Create("Dentist".into()),
            Call::Delete("evt_123".into()),
        ]
    );

    assert!(store.event("evt_123").is_none());
    let replacement = store.event("evt_456").unwrap();
    assert_eq!(replacement.summary, "Dentist");
    assert_eq!(replacement.description.as_deref(), Some("bring x-rays"));
    assert_eq!(replacement.location.as_deref(), Some("Clinic"));
    assert_eq!(
        replacement.start,
        EventTime::DateTime(utc("2024-06-01T14:00:00+07:00"))
    );
}

#[tokio::test]
async fn test_context_resolves_replaced_id() {
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Unsupported));
    let mut ctx = ConversationContext::new();
    let reconciler = Reconciler::new(&store).with_retry(fast_retry());

    reconciler
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();
    assert_eq!(ctx.resolve_id("evt_123"), "evt_456");
    assert_eq!(ctx.last_event_id(), Some("evt_456"));

    // A follow-up naming the stale id reaches the replacement
    let rename = EventPatch {
        summary: Some("Dentist (moved)".into()),
        ..EventPatch::default()
    };
    let outcome = reconciler.reconcile(&mut ctx, "evt_123", &rename).await.unwrap();
    assert_eq!(outcome.event_id(), "evt_457");
    assert_eq!(ctx.resolve_id("evt_123"), "evt_457");
    assert_eq!(store.event_count(), 1);
    assert_eq!(store.event("evt_457").unwrap().summary, "Dentist (moved)");
}

#[tokio::test]
async fn test_delete_failure_reports_partial_swap() {
    let store = dentist_store().configure(|s| {
        s.fail_update = Some(Failure::Unsupported);
        s.fail_delete = Some(Failure::Conflict);
    });
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap_err();

    match &err {
        ReconcileError::PartialSwap { old_id, new_id, .. } => {
            assert_eq!(old_id, "evt_123");
            assert_eq!(new_id, "evt_456");
        }
        other => panic!("expected partial swap, got {:?}", other),
    }

    // Both events exist; nothing was lost
    assert!(store.event("evt_123").is_some());
    assert!(store.event("evt_456").is_some());
}

#[tokio::test]
async fn test_delete_that_landed_before_timeout_completes_swap() {
    // The first delete removes the original but its response is lost;
    // the retry then sees the event already gone
    let store = dentist_store().configure(|s| {
        s.fail_update = Some(Failure::Unsupported);
        s.lossy_deletes = 1;
    });
    let mut ctx = ConversationContext::new();

    let outcome = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();

    match &outcome {
        SwapOutcome::SwappedViaRecreate { previous_id, event } => {
            assert_eq!(previous_id, "evt_123");
            assert_eq!(event.id, "evt_456");
        }
        other => panic!("expected a swap, got {:?}", other),
    }
    assert_eq!(
        store.calls()[2..].to_vec(),
        vec![
            Call::Create("Dentist".into()),
            Call::Delete("evt_123".into()),
            Call::Delete("evt_123".into()),
        ]
    );
    assert_eq!(store.event_count(), 1);
    assert!(store.event("evt_456").is_some());
    assert_eq!(ctx.resolve_id("evt_123"), "evt_456");
}

#[tokio::test]
async fn test_read_failure_creates_nothing() {
    let store = dentist_store().configure(|s| {
        s.fail_update = Some(Failure::Unsupported);
        s.fail_read = Some(Failure::Conflict);
    });
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Failed {
            stage: Stage::Read,
            ..
        }
    ));
    assert_eq!(
        store.calls(),
        vec![Call::Update("evt_123".into()), Call::Read("evt_123".into())]
    );
    assert_eq!(store.event_count(), 1);
    assert_eq!(ctx.resolve_id("evt_123"), "evt_123");
}

#[tokio::test]
async fn test_transient_create_is_retried_before_delete() {
    let store = dentist_store().configure(|s| {
        s.fail_update = Some(Failure::Unsupported);
        s.flaky_creates = 2;
    });
    let mut ctx = ConversationContext::new();

    let outcome = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();

    assert_eq!(outcome.event_id(), "evt_456");
    assert_eq!(
        store.calls(),
        vec![
            Call::Update("evt_123".into()),
            Call::Read("evt_123".into()),
            Call::Create("Dentist".into()),
            Call::Create("Dentist".into()),
            Call::Create("Dentist".into()),
            Call::Delete("evt_123".into()),
        ]
    );
    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn test_create_retries_stop_at_limit() {
    let store = dentist_store().configure(|s| {
        s.fail_update = Some(Failure::Unsupported);
        s.flaky_creates = 3;
    });
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Failed {
            stage: Stage::Create,
            ..
        }
    ));
    let calls = store.calls();
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Create(_))).count(), 3);
    assert!(!calls.iter().any(|c| matches!(c, Call::Delete(_))));
    assert!(store.event("evt_123").is_some());
}

#[tokio::test]
async fn test_create_failure_never_deletes() {
    let store = dentist_store().configure(|s| {
        s.fail_update = Some(Failure::Unsupported);
        s.fail_create = Some(Failure::Conflict);
    });
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Failed {
            stage: Stage::Create,
            ..
        }
    ));
    assert!(!store
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Delete(_))));

    let original = store.event("evt_123").unwrap();
    assert_eq!(original.start, EventTime::DateTime(utc("2024-06-01T02:00:00Z")));
    assert_eq!(store.event_count(), 1);
    assert_eq!(ctx.resolve_id("evt_123"), "evt_123");
}

#[tokio::test]
async fn test_other_update_errors_do_not_swap() {
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Conflict));
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Failed {
            stage: Stage::Update,
            ..
        }
    ));
    assert_eq!(store.calls(), vec![Call::Update("evt_123".into())]);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let store = dentist_store().configure(|s| s.flaky_updates = 2);
    let mut ctx = ConversationContext::new();

    let outcome = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();

    assert_eq!(outcome.event_id(), "evt_123");
    assert_eq!(store.calls().len(), 3);
}

#[tokio::test]
async fn test_auth_errors_are_not_retried() {
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Expired));
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap_err();

    assert!(err.requires_reauth());
    assert_eq!(store.calls().len(), 1);
}

#[tokio::test]
async fn test_invalid_patch_touches_nothing() {
    let store = dentist_store();
    let mut ctx = ConversationContext::new();
    let reconciler = Reconciler::new(&store).with_retry(fast_retry());

    let err = reconciler
        .reconcile(&mut ctx, "evt_123", &EventPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Invalid(_)));

    let backwards = EventPatch {
        start: Some(EventTime::DateTime(utc("2024-06-01T15:00:00+07:00"))),
        end: Some(EventTime::DateTime(utc("2024-06-01T14:00:00+07:00"))),
        ..EventPatch::default()
    };
    let err = reconciler
        .reconcile(&mut ctx, "evt_123", &backwards)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Invalid(_)));

    let mixed = EventPatch {
        start: Some(EventTime::DateTime(utc("2024-06-01T14:00:00+07:00"))),
        end: Some(EventTime::Date(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap())),
        ..EventPatch::default()
    };
    let err = reconciler
        .reconcile(&mut ctx, "evt_123", &mixed)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Invalid(_)));

    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_merged_state_is_validated_before_create() {
    // Moving only the start past the existing end makes the merged event invalid
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Unsupported));
    let mut ctx = ConversationContext::new();

    let patch = EventPatch {
        start: Some(EventTime::DateTime(utc("2024-06-01T11:00:00+07:00"))),
        ..EventPatch::default()
    };
    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile(&mut ctx, "evt_123", &patch)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Invalid(_)));
    assert!(!store
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Create(_) | Call::Delete(_))));
}

#[tokio::test]
async fn test_matching_refuses_ambiguous_target() {
    let store = dentist_store().with_event(
        "evt_200",
        "Dentist follow-up",
        "2024-06-08T09:00:00+07:00",
        "2024-06-08T10:00:00+07:00",
    );
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile_matching(
            &mut ctx,
            &store,
            &EventQuery::keyword("dentist"),
            &move_to_afternoon(),
        )
        .await
        .unwrap_err();

    match err {
        ReconcileError::AmbiguousTarget { candidates, .. } => {
            assert_eq!(candidates, vec!["evt_123".to_string(), "evt_200".to_string()]);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert_eq!(store.calls(), vec![Call::List]);
}

#[tokio::test]
async fn test_matching_reports_no_match() {
    let store = dentist_store();
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile_matching(&mut ctx, &store, &EventQuery::keyword("yoga"), &move_to_afternoon())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::NoMatch { .. }));
}

#[tokio::test]
async fn test_matching_single_event_swaps() {
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Unsupported));
    let mut ctx = ConversationContext::new();

    let outcome = Reconciler::new(&store)
        .with_retry(fast_retry())
        .reconcile_matching(
            &mut ctx,
            &store,
            &EventQuery::keyword("Dentist"),
            &move_to_afternoon(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.event_id(), "evt_456");
    assert_eq!(store.calls()[0], Call::List);
    assert_eq!(ctx.resolve_id("evt_123"), "evt_456");
}

#[tokio::test]
async fn test_remove_follows_replaced_id() {
    let store = dentist_store().configure(|s| s.fail_update = Some(Failure::Unsupported));
    let mut ctx = ConversationContext::new();
    let reconciler = Reconciler::new(&store).with_retry(fast_retry());

    reconciler
        .reconcile(&mut ctx, "evt_123", &move_to_afternoon())
        .await
        .unwrap();

    let removed = reconciler.remove(&mut ctx, "evt_123").await.unwrap();
    assert_eq!(removed, "evt_456");
    assert_eq!(store.event_count(), 0);
    assert_eq!(store.calls().last(), Some(&Call::Delete("evt_456".into())));
}

#[tokio::test]
async fn test_remove_unknown_id_fails_at_delete() {
    let store = dentist_store();
    let mut ctx = ConversationContext::new();

    let err = Reconciler::new(&store)
        .with_retry(fast_retry())
        .remove(&mut ctx, "evt_999")
        .await
        .unwrap_err();

    match err {
        ReconcileError::Failed {
            stage: Stage::Delete,
            source: CalendarError::EventNotFound(id),
        } => assert_eq!(id, "evt_999"),
        other => panic!("expected not found, got {:?}", other),
    }
    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn test_remove_matching_refuses_ambiguous_target() {
    let store = dentist_store().with_event(
        "evt_200",
        "Dentist follow-up",
        "2024-06-08T09:00:00+07:00",
        "2024-06-08T10:00:00+07:00",
    );
    let mut ctx = ConversationContext::new();
    let reconciler = Reconciler::new(&store).with_retry(fast_retry());

    let err = reconciler
        .remove_matching(&mut ctx, &store, &EventQuery::keyword("dentist"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::AmbiguousTarget { .. }));
    assert_eq!(store.event_count(), 2);

    let removed = reconciler
        .remove_matching(&mut ctx, &store, &EventQuery::keyword("follow-up"))
        .await
        .unwrap();
    assert_eq!(removed, "evt_200");
    assert_eq!(store.event_count(), 1);
    assert!(!store.calls().contains(&Call::Delete("evt_123".into())));
}
