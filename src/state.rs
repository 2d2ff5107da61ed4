//! Per-session conversation state and the literal yes/no/rewrite protocol.
//!
//! State is keyed by session id in a concurrent map; the pipeline takes a
//! session's state out at the start of a turn and writes it back at the end,
//! so nothing is held across await points. Turns within one session are
//! serialized by the host; independent sessions do not share state.

use crate::normalize::WrappedQuery;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// A pending create/update/delete, set by a trigger phrase and consumed by
/// the next structured key=value turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub entity: String,
    pub operation: OperationKind,
}

/// Everything the pipeline remembers about one conversation between turns.
/// At most one pending query and one pending operation are live at a time;
/// newer ones silently replace older ones.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub pending_query: Option<WrappedQuery>,
    pub pending_op: Option<PendingOperation>,
}

/// Session-keyed state map.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, ConversationState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Remove and return the session's state, or a fresh default.
    pub fn take(&self, session: &str) -> ConversationState {
        self.sessions
            .remove(session)
            .map(|(_, state)| state)
            .unwrap_or_default()
    }

    pub fn put(&self, session: &str, state: ConversationState) {
        self.sessions.insert(session.to_string(), state);
    }
}

/// A literal confirmation reply. Matching is case-insensitive on the trimmed
/// text and exact; anything else falls through to free-text processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationReply {
    Yes,
    No,
    Rewrite,
}

impl ConfirmationReply {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "yes" => Some(ConfirmationReply::Yes),
            "no" => Some(ConfirmationReply::No),
            "rewrite" => Some(ConfirmationReply::Rewrite),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_parse_is_exact() {
        assert_eq!(ConfirmationReply::parse("yes"), Some(ConfirmationReply::Yes));
        assert_eq!(ConfirmationReply::parse("  YES "), Some(ConfirmationReply::Yes));
        assert_eq!(ConfirmationReply::parse("no"), Some(ConfirmationReply::No));
        assert_eq!(ConfirmationReply::parse("Rewrite"), Some(ConfirmationReply::Rewrite));
        assert_eq!(ConfirmationReply::parse("yes please"), None);
        assert_eq!(ConfirmationReply::parse("nope"), None);
    }

    #[test]
    fn test_take_clears_session() {
        let store = SessionStore::new();
        let mut state = ConversationState::default();
        state.pending_op = Some(PendingOperation {
            entity: "recipes".to_string(),
            operation: OperationKind::Insert,
        });
        store.put("s1", state);

        let taken = store.take("s1");
        assert!(taken.pending_op.is_some());

        // Second take sees a fresh default.
        let again = store.take("s1");
        assert!(again.pending_op.is_none());
        assert!(again.pending_query.is_none());
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::new();
        let mut state = ConversationState::default();
        state.pending_op = Some(PendingOperation {
            entity: "recipes".to_string(),
            operation: OperationKind::Delete,
        });
        store.put("a", state);

        assert!(store.take("b").pending_op.is_none());
        assert!(store.take("a").pending_op.is_some());
    }
}
