//! Per-session conversational memory.
//!
//! One `ConversationContext` belongs to one chat session. It is created when
//! the session starts, passed by `&mut` into every operation that needs it,
//! and cleared on a full reset. Nothing here is global.

use std::collections::HashMap;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Upper bound on followed renames, guards against accidental cycles.
const MAX_RESOLVE_HOPS: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    turns: Vec<Turn>,
    /// Old event ID -> the ID of the event that replaced it
    replaced_ids: HashMap<String, String>,
    last_event_id: Option<String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Remember the event the conversation is currently about.
    pub fn note_event(&mut self, event_id: impl Into<String>) {
        self.last_event_id = Some(event_id.into());
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Record that `old_id` no longer exists and `new_id` carries its content.
    pub fn record_replacement(&mut self, old_id: impl Into<String>, new_id: impl Into<String>) {
        let new_id = new_id.into();
        self.replaced_ids.insert(old_id.into(), new_id.clone());
        self.last_event_id = Some(new_id);
    }

    /// Follow recorded replacements to the current identifier of an event.
    pub fn resolve_id<'a>(&'a self, event_id: &'a str) -> &'a str {
        let mut current = event_id;
        for _ in 0..MAX_RESOLVE_HOPS {
            match self.replaced_ids.get(current) {
                Some(next) if next.as_str() != current => current = next.as_str(),
                _ => break,
            }
        }
        current
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.replaced_ids.is_empty() && self.last_event_id.is_none()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.replaced_ids.clear();
        self.last_event_id = None;
    }
}
