//! Materialization sessions
//!
//! One session is one request-to-cleanup lifecycle for a single artifact.
//! The session's observable state lives in a `watch` channel so callers can
//! read it, or await a settled state, without touching the driver task.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::slot::SlotInner;
use crate::{
    ArtifactHandle, DeleteOutcome, FailureReason, GenerationBackend, PollPolicy, PollState,
    ProbeOutcome, RequestDescriptor, SessionEvent, SessionState, SessionStateMachine, SlotListener,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference handed to the listener once an artifact can be displayed
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyArtifact {
    pub session: SessionId,
    pub handle: ArtifactHandle,
    pub url: String,
    pub ready_at: DateTime<Utc>,
}

/// Outcome of best-effort artifact deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStatus {
    /// Session still owns its artifact (or may still receive one)
    Idle,
    /// No artifact was ever assigned; nothing to delete
    Skipped,
    /// Deletion request issued, response pending
    Requested,
    Deleted,
    /// Backend answered 404
    AlreadyGone,
    /// Non-404 error or transport failure; logged only
    Failed(String),
}

impl CleanupStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Idle | Self::Requested)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub handle: Option<ArtifactHandle>,
    pub poll: Option<PollState>,
    pub cleanup: CleanupStatus,
}

impl SessionSnapshot {
    fn requesting() -> Self {
        Self {
            state: SessionState::Requesting,
            handle: None,
            poll: None,
            cleanup: CleanupStatus::Idle,
        }
    }
}

enum ProbeStep {
    Ready,
    Retry(PollState),
    Exhausted(PollState),
    Ended,
}

pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) descriptor: RequestDescriptor,
    policy: PollPolicy,
    snapshot: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
    slot: Weak<SlotInner>,
    backend: Arc<dyn GenerationBackend>,
    runtime: tokio::runtime::Handle,
}

impl SessionShared {
    pub(crate) fn new(
        descriptor: RequestDescriptor,
        policy: PollPolicy,
        slot: Weak<SlotInner>,
        backend: Arc<dyn GenerationBackend>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::requesting());
        Self {
            id: SessionId::new(),
            descriptor,
            policy,
            snapshot,
            cancel: CancellationToken::new(),
            slot,
            backend,
            runtime,
        }
    }

    /// Dismiss or supersede the session.
    ///
    /// Stops the poll timer and, if an artifact was assigned, issues its
    /// deletion. A session still waiting on its generation request deletes
    /// the artifact itself once the filename arrives.
    pub(crate) fn end(self: &Arc<Self>, event: SessionEvent) {
        let mut ended = None;
        let mut release = None;
        self.snapshot.send_if_modified(|snap| {
            let Ok(next) = SessionStateMachine::transition(snap.state, event) else {
                return false;
            };
            ended = Some(snap.state);
            snap.state = next;
            if let (Some(handle), CleanupStatus::Idle) = (&snap.handle, &snap.cleanup) {
                snap.cleanup = CleanupStatus::Requested;
                release = Some(handle.clone());
            }
            true
        });

        let Some(previous) = ended else {
            return;
        };
        self.cancel.cancel();
        tracing::info!(
            session_id = %self.id,
            id = %self.descriptor.id,
            from = %previous,
            event = %event,
            "Session ended"
        );

        if let Some(handle) = release {
            let session = Arc::clone(self);
            self.runtime.spawn(async move { session.release(handle).await });
        }
    }

    pub(crate) async fn drive(self: Arc<Self>) {
        let handle = match self.backend.request_generation(&self.descriptor).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    id = %self.descriptor.id,
                    error = %e,
                    "Generation request failed"
                );
                if self.fail_request() {
                    self.notify(|listener| {
                        listener.on_failed(self.id, FailureReason::RequestFailed)
                    });
                }
                return;
            }
        };

        tracing::info!(session_id = %self.id, filename = %handle, "Generation request accepted");

        if !self.assign(&handle) {
            tracing::debug!(
                session_id = %self.id,
                filename = %handle,
                "Session ended before its artifact was assigned"
            );
            self.release(handle).await;
            return;
        }

        let mut attempt = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(session_id = %self.id, "Polling stopped");
                    return;
                }
                _ = tokio::time::sleep(self.policy.delay_before(attempt)) => {}
            }

            let available = match self.backend.probe(&handle).await {
                Ok(ProbeOutcome::Ready) => true,
                Ok(ProbeOutcome::NotReady(status)) => {
                    tracing::debug!(session_id = %self.id, filename = %handle, status, "Artifact not ready yet");
                    false
                }
                Err(e) => {
                    tracing::debug!(session_id = %self.id, filename = %handle, error = %e, "Probe failed");
                    false
                }
            };

            match self.record_probe(available) {
                ProbeStep::Ended => return,
                ProbeStep::Ready => {
                    let artifact = ReadyArtifact {
                        session: self.id,
                        url: self.backend.artifact_url(&handle),
                        handle: handle.clone(),
                        ready_at: Utc::now(),
                    };
                    tracing::info!(session_id = %self.id, url = %artifact.url, "Artifact ready");
                    self.notify(|listener| listener.on_ready(&artifact));
                    return;
                }
                ProbeStep::Retry(poll) => {
                    attempt = poll.attempt;
                    tracing::debug!(
                        session_id = %self.id,
                        attempt = poll.attempt,
                        max_attempts = poll.max_attempts,
                        "Artifact not ready, retrying"
                    );
                    self.notify(|listener| listener.on_progress(self.id, &poll));
                }
                ProbeStep::Exhausted(poll) => {
                    tracing::warn!(
                        session_id = %self.id,
                        filename = %handle,
                        attempts = poll.attempt,
                        elapsed_ms = poll.elapsed().as_millis() as u64,
                        "Artifact generation timed out"
                    );
                    self.notify(|listener| listener.on_failed(self.id, FailureReason::Timeout));
                    return;
                }
            }
        }
    }

    fn fail_request(&self) -> bool {
        let mut failed = false;
        self.snapshot.send_modify(|snap| {
            if let Ok(next) = SessionStateMachine::transition(snap.state, SessionEvent::RequestFailed)
            {
                snap.state = next;
                failed = true;
            }
            snap.cleanup = CleanupStatus::Skipped;
        });
        failed
    }

    /// Store the handle; `false` when the session already ended and the
    /// caller must release the artifact instead of polling.
    fn assign(&self, handle: &ArtifactHandle) -> bool {
        let mut polling = false;
        self.snapshot.send_modify(|snap| {
            snap.handle = Some(handle.clone());
            match SessionStateMachine::transition(snap.state, SessionEvent::HandleAssigned) {
                Ok(next) => {
                    snap.state = next;
                    snap.poll = Some(PollState::start(&self.policy));
                    polling = true;
                }
                Err(_) => snap.cleanup = CleanupStatus::Requested,
            }
        });
        polling
    }

    fn record_probe(&self, available: bool) -> ProbeStep {
        let mut step = ProbeStep::Ended;
        self.snapshot.send_if_modified(|snap| {
            if snap.state != SessionState::Polling {
                return false;
            }
            if available {
                if let Ok(next) =
                    SessionStateMachine::transition(snap.state, SessionEvent::ArtifactAvailable)
                {
                    snap.state = next;
                }
                step = ProbeStep::Ready;
                return true;
            }

            let poll = snap.poll.get_or_insert_with(|| PollState::start(&self.policy));
            poll.attempt += 1;
            if poll.is_exhausted() {
                if let Ok(next) =
                    SessionStateMachine::transition(snap.state, SessionEvent::AttemptsExhausted)
                {
                    snap.state = next;
                }
                step = ProbeStep::Exhausted(*poll);
            } else {
                step = ProbeStep::Retry(*poll);
            }
            true
        });
        step
    }

    /// Best-effort deletion: the outcome is recorded and logged, never returned.
    async fn release(&self, handle: ArtifactHandle) {
        let status = match self.backend.delete(&handle).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::info!(session_id = %self.id, filename = %handle, "Deleted artifact");
                CleanupStatus::Deleted
            }
            Ok(DeleteOutcome::AlreadyGone) => {
                tracing::info!(
                    session_id = %self.id,
                    filename = %handle,
                    "Artifact did not exist (still generating or already removed)"
                );
                CleanupStatus::AlreadyGone
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, filename = %handle, error = %e, "Failed to delete artifact");
                CleanupStatus::Failed(e.to_string())
            }
        };
        self.snapshot.send_modify(|snap| snap.cleanup = status);
    }

    /// Run `f` against the listener only while this session is its slot's
    /// current session.
    fn notify(&self, f: impl FnOnce(&dyn SlotListener)) -> bool {
        let delivered = self
            .slot
            .upgrade()
            .is_some_and(|slot| slot.with_current(self.id, f));
        if !delivered {
            tracing::debug!(session_id = %self.id, "Dropping result of a session that is no longer current");
        }
        delivered
    }
}

/// Caller-facing handle on one session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.shared.descriptor
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    pub fn artifact_handle(&self) -> Option<ArtifactHandle> {
        self.shared.snapshot.borrow().handle.clone()
    }

    pub fn poll_state(&self) -> Option<PollState> {
        self.shared.snapshot.borrow().poll
    }

    /// Fraction of the poll budget used so far; `None` before polling starts.
    pub fn progress_fraction(&self) -> Option<f64> {
        self.poll_state().map(|poll| poll.progress_fraction())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Dismiss this session: the UI element showing it went away.
    ///
    /// Never fails and never waits on the network.
    pub fn cancel(&self) {
        if let Some(slot) = self.shared.slot.upgrade() {
            slot.clear_if_current(self.shared.id);
        }
        self.shared.end(SessionEvent::Dismiss);
    }

    /// Wait until the session is ready, failed, dismissed or superseded.
    pub async fn settled(&self) -> SessionSnapshot {
        self.wait_for(|snap| snap.state.is_settled()).await
    }

    /// Wait until deletion finished or was found unnecessary.
    ///
    /// Only resolves once the session has been dismissed or superseded
    /// (or its request failed).
    pub async fn cleanup_settled(&self) -> CleanupStatus {
        self.wait_for(|snap| snap.cleanup.is_settled()).await.cleanup
    }

    async fn wait_for(&self, mut predicate: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = self.shared.snapshot.subscribe();
        let snapshot = rx.wait_for(|snap| predicate(snap)).await.map(|snap| snap.clone());
        // The sender lives as long as `self.shared`, so this only falls back
        // in theory.
        snapshot.unwrap_or_else(|_| self.snapshot())
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("descriptor", &self.shared.descriptor)
            .field("snapshot", &*self.shared.snapshot.borrow())
            .finish()
    }
}
