//! Slot listeners
//!
//! A listener is the presentation side of a slot: it is told when the
//! current session's artifact is ready, when it failed, and how polling is
//! progressing. Results of superseded or dismissed sessions never reach it.

use tokio::sync::mpsc;

use crate::{FailureReason, PollState, ReadyArtifact, SessionId};

/// Callbacks for the current session of a slot.
///
/// Callbacks run while the slot's delivery lock is held, which is what makes
/// "still current" and "render" a single step. Implementations should return
/// quickly. Calling back into the same [`crate::Slot`] is allowed, e.g.
/// re-submitting from `on_failed`.
pub trait SlotListener: Send + Sync {
    fn on_ready(&self, artifact: &ReadyArtifact);

    fn on_failed(&self, session: SessionId, reason: FailureReason);

    /// Called after each probe that found the artifact not ready yet.
    fn on_progress(&self, _session: SessionId, _poll: &PollState) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    Ready(ReadyArtifact),
    Failed {
        session: SessionId,
        reason: FailureReason,
    },
    Progress {
        session: SessionId,
        poll: PollState,
    },
}

impl SlotEvent {
    pub fn session(&self) -> SessionId {
        match self {
            Self::Ready(artifact) => artifact.session,
            Self::Failed { session, .. } | Self::Progress { session, .. } => *session,
        }
    }
}

/// Forwards slot callbacks into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SlotEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SlotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SlotEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Slot event receiver dropped; discarding event");
        }
    }
}

impl SlotListener for ChannelListener {
    fn on_ready(&self, artifact: &ReadyArtifact) {
        self.forward(SlotEvent::Ready(artifact.clone()));
    }

    fn on_failed(&self, session: SessionId, reason: FailureReason) {
        self.forward(SlotEvent::Failed { session, reason });
    }

    fn on_progress(&self, session: SessionId, poll: &PollState) {
        self.forward(SlotEvent::Progress {
            session,
            poll: *poll,
        });
    }
}
