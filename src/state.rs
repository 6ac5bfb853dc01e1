//! Task state machine: which transitions a persisted task may take.
//!
//! These predicates are consulted by the store before every state mutation.

use crate::types::TaskState;

impl TaskState {
    /// Enqueued or downloading tasks can be cancelled
    pub fn can_cancel(&self) -> bool {
        matches!(self, TaskState::Enqueued | TaskState::Downloading(_))
    }

    /// Anything not cancelled may start downloading
    pub fn can_download(&self) -> bool {
        !matches!(self, TaskState::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// A cancelled task may only be re-enqueued (or reset to undefined); it can never
    /// move to a finishing state or be cancelled again. Every other transition is legal.
    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        match self {
            TaskState::Cancelled => matches!(next, TaskState::Undefined | TaskState::Enqueued),
            _ => true,
        }
    }
}
