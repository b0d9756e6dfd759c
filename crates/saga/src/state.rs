//! Correlation state machine for one saga handler and one message.

use serde::{Deserialize, Serialize};

/// How a message was resolved against a saga and what was persisted.
///
/// State transitions:
/// ```text
/// NotFound ──┬──► Created
///            ├──► Discarded   (created and completed by the same message)
///            └──► Ignored     (not an initiator, unmatched policy Ignore)
/// Found ─────┬──► Updated
///            ├──► Unchanged   (marked unchanged, or an idempotent duplicate)
///            └──► Deleted     (marked complete)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationState {
    /// No instance matched the message.
    NotFound,

    /// An existing instance matched the message.
    Found,

    /// A new instance was inserted (terminal state).
    Created,

    /// A new instance completed immediately and was never stored (terminal state).
    Discarded,

    /// The message was not for any instance and was dropped (terminal state).
    Ignored,

    /// The instance was updated (terminal state).
    Updated,

    /// The instance was left as stored (terminal state).
    Unchanged,

    /// The instance was deleted (terminal state).
    Deleted,
}

impl CorrelationState {
    /// Returns the terminal state reached after the handler ran.
    pub fn after_handler(self, completed: bool, unchanged: bool) -> Self {
        match (self, completed, unchanged) {
            (CorrelationState::NotFound, true, _) => CorrelationState::Discarded,
            (CorrelationState::NotFound, false, _) => CorrelationState::Created,
            (CorrelationState::Found, true, _) => CorrelationState::Deleted,
            (CorrelationState::Found, false, true) => CorrelationState::Unchanged,
            (CorrelationState::Found, false, false) => CorrelationState::Updated,
            (terminal, _, _) => terminal,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CorrelationState::NotFound | CorrelationState::Found)
    }

    /// Returns true if reaching this state wrote to saga storage.
    pub fn writes_storage(&self) -> bool {
        matches!(
            self,
            CorrelationState::Created | CorrelationState::Updated | CorrelationState::Deleted
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationState::NotFound => "NotFound",
            CorrelationState::Found => "Found",
            CorrelationState::Created => "Created",
            CorrelationState::Discarded => "Discarded",
            CorrelationState::Ignored => "Ignored",
            CorrelationState::Updated => "Updated",
            CorrelationState::Unchanged => "Unchanged",
            CorrelationState::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for CorrelationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
