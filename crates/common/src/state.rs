//! State machine errors
//!
//! Returned by every lifecycle state machine in the workspace when an event
//! does not apply to the current state.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Invalid transition: no transition from {from} via {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Terminal state: {0} accepts no further events")]
    TerminalState(String),
}

impl StateError {
    pub fn invalid(from: impl ToString, event: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }
}
