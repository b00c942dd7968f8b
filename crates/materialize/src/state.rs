//! Session state machine
//!
//! ```text
//! requesting ──assign──▶ polling ──ready──▶ ready
//!     │                     └──exhausted──▶ failed(timeout)
//!     └──request_failed──▶ failed(request_failed)
//!
//! any non-terminal state ──dismiss──▶ dismissed
//!                        ──supersede──▶ superseded
//! ```
//!
//! `ready` and `failed` are settled but not terminal: the session still
//! holds its artifact until the slot lets go of it.

use livepub_common::StateError;

/// Failures surfaced to the slot listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Submission transport or parse error; no artifact was assigned
    RequestFailed,
    /// The artifact never became available within the poll budget
    Timeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestFailed => write!(f, "request_failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Requesting,
    Polling,
    Ready,
    Failed(FailureReason),
    Dismissed,
    Superseded,
}

impl SessionState {
    /// Dismissed and superseded sessions never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dismissed | Self::Superseded)
    }

    /// No more network work will be started on the session's own initiative
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Requesting | Self::Polling)
    }

    pub fn valid_transitions(&self) -> &'static [SessionState] {
        use FailureReason::*;
        match self {
            Self::Requesting => &[
                Self::Polling,
                Self::Failed(RequestFailed),
                Self::Dismissed,
                Self::Superseded,
            ],
            Self::Polling => &[
                Self::Ready,
                Self::Failed(Timeout),
                Self::Dismissed,
                Self::Superseded,
            ],
            Self::Ready | Self::Failed(_) => &[Self::Dismissed, Self::Superseded],
            Self::Dismissed | Self::Superseded => &[],
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requesting => write!(f, "requesting"),
            Self::Polling => write!(f, "polling"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
            Self::Dismissed => write!(f, "dismissed"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

/// Events that trigger session state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Backend answered the generation request with a filename
    HandleAssigned,
    /// Generation request failed
    RequestFailed,
    /// A probe found the artifact
    ArtifactAvailable,
    /// The last allowed probe came back not ready
    AttemptsExhausted,
    /// The owning UI element was closed
    Dismiss,
    /// A newer session took over the slot
    Supersede,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HandleAssigned => write!(f, "handle_assigned"),
            Self::RequestFailed => write!(f, "request_failed"),
            Self::ArtifactAvailable => write!(f, "artifact_available"),
            Self::AttemptsExhausted => write!(f, "attempts_exhausted"),
            Self::Dismiss => write!(f, "dismiss"),
            Self::Supersede => write!(f, "supersede"),
        }
    }
}

pub struct SessionStateMachine;

impl SessionStateMachine {
    /// Attempt a state transition
    pub fn transition(
        current: SessionState,
        event: SessionEvent,
    ) -> Result<SessionState, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let next = match (current, event) {
            (SessionState::Requesting, SessionEvent::HandleAssigned) => SessionState::Polling,
            (SessionState::Requesting, SessionEvent::RequestFailed) => {
                SessionState::Failed(FailureReason::RequestFailed)
            }

            (SessionState::Polling, SessionEvent::ArtifactAvailable) => SessionState::Ready,
            (SessionState::Polling, SessionEvent::AttemptsExhausted) => {
                SessionState::Failed(FailureReason::Timeout)
            }

            (_, SessionEvent::Dismiss) => SessionState::Dismissed,
            (_, SessionEvent::Supersede) => SessionState::Superseded,

            _ => return Err(StateError::invalid(current, event)),
        };

        Ok(next)
    }

    pub fn can_transition(current: SessionState, event: SessionEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
