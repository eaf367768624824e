//! Event updates with a create-then-delete fallback.
//!
//! Some events cannot be modified in place (instances of recurring series,
//! events organized by someone else). For those the reconciler creates a new
//! event carrying the desired state and then deletes the old one. The old
//! event is only deleted after the replacement exists, so a failure never
//! loses data; at worst both events remain and the caller is told so.

use std::fmt;

use thiserror::Error;

use crate::context::ConversationContext;
use crate::error::CalendarError;
use crate::retry::{with_retry, RetryConfig};
use crate::store::{CalendarStore, EventLocator};
use crate::types::{Event, EventPatch, EventQuery};

/// How an update was carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    /// The store accepted the change; the identifier is unchanged.
    UpdatedInPlace { event: Event },
    /// The event was recreated; `event.id` differs from `previous_id`.
    SwappedViaRecreate { previous_id: String, event: Event },
}

impl SwapOutcome {
    /// Identifier of the event that now holds the requested state.
    pub fn event_id(&self) -> &str {
        &self.event().id
    }

    pub fn event(&self) -> &Event {
        match self {
            SwapOutcome::UpdatedInPlace { event } => event,
            SwapOutcome::SwappedViaRecreate { event, .. } => event,
        }
    }

    pub fn was_swapped(&self) -> bool {
        matches!(self, SwapOutcome::SwappedViaRecreate { .. })
    }
}

/// Step of the procedure that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locate,
    Update,
    Read,
    Create,
    Delete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Locate => "locate",
            Stage::Update => "update",
            Stage::Read => "read",
            Stage::Create => "create",
            Stage::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Rejected before contacting the store.
    #[error("Invalid update: {0}")]
    Invalid(String),

    /// Credentials were rejected; the caller must re-authenticate.
    #[error("Authentication failed during {stage}: {source}")]
    Auth {
        stage: Stage,
        #[source]
        source: CalendarError,
    },

    #[error("No event matches {query}")]
    NoMatch { query: String },

    #[error("{} events match {query}; narrow the search", .candidates.len())]
    AmbiguousTarget {
        query: String,
        candidates: Vec<String>,
    },

    /// The replacement exists but the original could not be removed.
    /// Both events are now in the calendar and need manual cleanup.
    #[error("Created {new_id} but could not delete {old_id}; both events now exist: {source}")]
    PartialSwap {
        old_id: String,
        new_id: String,
        #[source]
        source: CalendarError,
    },

    #[error("{stage} failed: {source}")]
    Failed {
        stage: Stage,
        #[source]
        source: CalendarError,
    },
}

impl ReconcileError {
    fn from_stage(stage: Stage, source: CalendarError) -> Self {
        if source.should_refresh_token() {
            ReconcileError::Auth { stage, source }
        } else {
            ReconcileError::Failed { stage, source }
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, ReconcileError::Auth { .. })
    }

    /// Message suitable for the chat transcript.
    pub fn user_message(&self) -> String {
        match self {
            ReconcileError::Invalid(msg) => format!("That change is not valid: {}", msg),
            ReconcileError::Auth { .. } => {
                "Your Google session has expired. Please sign in again.".to_string()
            }
            ReconcileError::NoMatch { query } => format!("I couldn't find any event matching {}.", query),
            ReconcileError::AmbiguousTarget { candidates, .. } => format!(
                "Several events match ({}). Please be more specific.",
                candidates.join(", ")
            ),
            ReconcileError::PartialSwap { old_id, new_id, .. } => format!(
                "The updated event was created ({}), but the original ({}) could not be removed. Please delete it manually.",
                new_id, old_id
            ),
            ReconcileError::Failed { source, .. } => source.user_message(),
        }
    }
}

/// Applies updates against a [`CalendarStore`], falling back to
/// create-then-delete when the store refuses an in-place change.
///
/// Holds no state between calls; per-conversation memory is passed in.
pub struct Reconciler<'a, S: ?Sized> {
    store: &'a S,
    retry: RetryConfig,
}

impl<'a, S: CalendarStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bring the event `target_id` to the state described by `patch`.
    ///
    /// `target_id` is resolved through `ctx` first, so an identifier that an
    /// earlier swap replaced still reaches the live event.
    #[tracing::instrument(skip(self, ctx, patch), level = "info")]
    pub async fn reconcile(
        &self,
        ctx: &mut ConversationContext,
        target_id: &str,
        patch: &EventPatch,
    ) -> Result<SwapOutcome, ReconcileError> {
        patch.validate().map_err(ReconcileError::Invalid)?;

        let target_id = ctx.resolve_id(target_id).to_string();

        let update_err = match with_retry(&self.retry, "update", || {
            self.store.update(&target_id, patch)
        })
        .await
        {
            Ok(event) => {
                tracing::info!("Updated event {} in place", event.id);
                ctx.note_event(event.id.clone());
                return Ok(SwapOutcome::UpdatedInPlace { event });
            }
            Err(e) => e,
        };

        if !update_err.is_update_unsupported() {
            return Err(ReconcileError::from_stage(Stage::Update, update_err));
        }

        tracing::warn!(
            "In-place update of {} not supported ({}); recreating",
            target_id,
            update_err
        );

        let outcome = self.swap(&target_id, patch).await?;
        ctx.record_replacement(target_id.as_str(), outcome.event_id());
        Ok(outcome)
    }

    /// Find the single event matching `query` and reconcile it.
    ///
    /// More than one match is refused rather than guessed at.
    pub async fn reconcile_matching<L: EventLocator + ?Sized>(
        &self,
        ctx: &mut ConversationContext,
        locator: &L,
        query: &EventQuery,
        patch: &EventPatch,
    ) -> Result<SwapOutcome, ReconcileError> {
        patch.validate().map_err(ReconcileError::Invalid)?;

        let target = self.locate_one(locator, query).await?;
        self.reconcile(ctx, &target.id, patch).await
    }

    /// Delete the event `target_id`, following any earlier replacement.
    ///
    /// Returns the identifier that was actually removed.
    #[tracing::instrument(skip(self, ctx), level = "info")]
    pub async fn remove(
        &self,
        ctx: &mut ConversationContext,
        target_id: &str,
    ) -> Result<String, ReconcileError> {
        let target_id = ctx.resolve_id(target_id).to_string();
        if target_id.trim().is_empty() {
            return Err(ReconcileError::Invalid("event id is empty".to_string()));
        }

        with_retry(&self.retry, "delete", || self.store.delete(&target_id))
            .await
            .map_err(|e| ReconcileError::from_stage(Stage::Delete, e))?;

        tracing::info!("Deleted event {}", target_id);
        ctx.note_event(target_id.clone());
        Ok(target_id)
    }

    /// Delete the single event matching `query`; several matches are refused.
    pub async fn remove_matching<L: EventLocator + ?Sized>(
        &self,
        ctx: &mut ConversationContext,
        locator: &L,
        query: &EventQuery,
    ) -> Result<String, ReconcileError> {
        let target = self.locate_one(locator, query).await?;
        self.remove(ctx, &target.id).await
    }

    async fn locate_one<L: EventLocator + ?Sized>(
        &self,
        locator: &L,
        query: &EventQuery,
    ) -> Result<Event, ReconcileError> {
        let mut matches = with_retry(&self.retry, "locate", || locator.find(query))
            .await
            .map_err(|e| ReconcileError::from_stage(Stage::Locate, e))?;

        match matches.len() {
            0 => Err(ReconcileError::NoMatch {
                query: query.describe(),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                let candidates: Vec<String> = matches.iter().map(|e| e.id.clone()).collect();
                tracing::warn!(
                    "Refusing to act: {} events match {}",
                    candidates.len(),
                    query.describe()
                );
                Err(ReconcileError::AmbiguousTarget {
                    query: query.describe(),
                    candidates,
                })
            }
        }
    }

    async fn swap(&self, target_id: &str, patch: &EventPatch) -> Result<SwapOutcome, ReconcileError> {
        let current = with_retry(&self.retry, "read", || self.store.read(target_id))
            .await
            .map_err(|e| ReconcileError::from_stage(Stage::Read, e))?;

        let draft = patch.apply_to(&current);
        draft.validate().map_err(ReconcileError::Invalid)?;

        // Nothing has been written yet; a failure here leaves the original untouched
        let created = with_retry(&self.retry, "create", || self.store.create(&draft))
            .await
            .map_err(|e| ReconcileError::from_stage(Stage::Create, e))?;

        tracing::info!("Created replacement {} for {}", created.id, target_id);

        match with_retry(&self.retry, "delete", || self.store.delete(target_id)).await {
            Ok(()) => {}
            // An earlier attempt may have landed before its response was lost
            Err(CalendarError::EventNotFound(_)) => {
                tracing::info!("Original {} already gone after delete retry", target_id);
            }
            Err(e) => {
                tracing::error!(
                    "Replacement {} created but original {} could not be deleted: {}",
                    created.id,
                    target_id,
                    e
                );
                return Err(ReconcileError::PartialSwap {
                    old_id: target_id.to_string(),
                    new_id: created.id,
                    source: e,
                });
            }
        }

        tracing::info!("Swapped {} -> {}", target_id, created.id);
        Ok(SwapOutcome::SwappedViaRecreate {
            previous_id: target_id.to_string(),
            event: created,
        })
    }
}
