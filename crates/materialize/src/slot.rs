//! Materializer and slots
//!
//! A slot is one UI location (a map popup) that hosts at most one current
//! session. Submitting into an occupied slot supersedes the previous session;
//! dismissing the slot (or dropping it) ends the current one. Both paths
//! delete the ended session's artifact on a best-effort basis.

use std::cell::RefCell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::session::SessionShared;
use crate::{
    GenerationBackend, MaterializeError, PollPolicy, RequestDescriptor, SessionEvent,
    SessionHandle, SessionId, SlotListener,
};

/// Artifact materialization client: creates slots bound to one backend.
#[derive(Clone)]
pub struct Materializer {
    backend: Arc<dyn GenerationBackend>,
    policy: PollPolicy,
    runtime: tokio::runtime::Handle,
}

impl Materializer {
    /// Create a materializer on the current Tokio runtime.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        policy: PollPolicy,
    ) -> Result<Self, MaterializeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            MaterializeError::Configuration(format!("Materializer needs a Tokio runtime: {e}"))
        })?;
        Ok(Self::with_runtime(backend, policy, runtime))
    }

    pub fn with_runtime(
        backend: Arc<dyn GenerationBackend>,
        policy: PollPolicy,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            backend,
            policy,
            runtime,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn slot(&self, listener: Arc<dyn SlotListener>) -> Slot {
        self.slot_with_policy(listener, self.policy)
    }

    /// A slot whose sessions poll with their own policy, e.g. a heavier artifact.
    pub fn slot_with_policy(&self, listener: Arc<dyn SlotListener>, policy: PollPolicy) -> Slot {
        Slot {
            inner: Arc::new(SlotInner::new(
                listener,
                Arc::clone(&self.backend),
                policy,
                self.runtime.clone(),
            )),
        }
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("policy", &self.policy)
            .finish()
    }
}

thread_local! {
    /// Slots whose delivery lock the current thread holds while a listener
    /// callback runs.
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks the slot as delivering on this thread until dropped.
struct DeliveryScope {
    slot: usize,
}

impl DeliveryScope {
    fn enter(slot: usize) -> Self {
        DELIVERING.with(|slots| slots.borrow_mut().push(slot));
        Self { slot }
    }

    fn is_active(slot: usize) -> bool {
        DELIVERING.with(|slots| slots.borrow().contains(&slot))
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(pos) = slots.iter().rposition(|slot| *slot == self.slot) {
                slots.remove(pos);
            }
        });
    }
}

pub(crate) struct SlotInner {
    current: Mutex<Option<Arc<SessionShared>>>,
    /// Serializes listener delivery against changes of the current session.
    /// Never held across an await.
    delivery: Mutex<()>,
    listener: Arc<dyn SlotListener>,
    backend: Arc<dyn GenerationBackend>,
    policy: PollPolicy,
    runtime: tokio::runtime::Handle,
}

impl SlotInner {
    fn new(
        listener: Arc<dyn SlotListener>,
        backend: Arc<dyn GenerationBackend>,
        policy: PollPolicy,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            current: Mutex::new(None),
            delivery: Mutex::new(()),
            listener,
            backend,
            policy,
            runtime,
        }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<SessionShared>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the delivery lock, unless this thread already holds it because a
    /// listener callback of this slot is calling back into the slot.
    fn lock_delivery(&self) -> Option<MutexGuard<'_, ()>> {
        if DeliveryScope::is_active(self.key()) {
            return None;
        }
        Some(self.delivery.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Race guard: `f` runs only if `id` is still current. The delivery lock
    /// is held throughout, so no newer session can be installed by another
    /// thread in between. Calls made from inside `f` into the same slot
    /// proceed on this thread without waiting.
    pub(crate) fn with_current(&self, id: SessionId, f: impl FnOnce(&dyn SlotListener)) -> bool {
        let _delivery = self.lock_delivery();
        let is_current = self
            .lock_current()
            .as_ref()
            .is_some_and(|session| session.id == id);
        if !is_current {
            return false;
        }

        let _scope = DeliveryScope::enter(self.key());
        f(self.listener.as_ref());
        true
    }

    /// Install `session` as current and return the one it replaces.
    fn replace_current(&self, session: Arc<SessionShared>) -> Option<Arc<SessionShared>> {
        let _delivery = self.lock_delivery();
        let previous = self.lock_current().replace(session);
        previous
    }

    fn take_current(&self) -> Option<Arc<SessionShared>> {
        let _delivery = self.lock_delivery();
        let current = self.lock_current().take();
        current
    }

    pub(crate) fn clear_if_current(&self, id: SessionId) -> bool {
        let _delivery = self.lock_delivery();
        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|session| session.id == id) {
            *current = None;
            true
        } else {
            false
        }
    }
}

impl Drop for SlotInner {
    fn drop(&mut self) {
        let current = self
            .current
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = current {
            tracing::debug!(session_id = %session.id, "Slot dropped; dismissing current session");
            session.end(SessionEvent::Dismiss);
        }
    }
}

/// One UI location hosting at most one current session.
///
/// Cheap to clone; the slot is dismissed when the last clone is dropped.
#[derive(Clone)]
pub struct Slot {
    inner: Arc<SlotInner>,
}

impl Slot {
    /// Start a new session for `descriptor`, superseding the current one.
    ///
    /// Only fails when the descriptor is invalid; in that case the current
    /// session is left untouched. Transport failures are reported to the
    /// listener as `request_failed`.
    pub fn submit(&self, descriptor: RequestDescriptor) -> Result<SessionHandle, MaterializeError> {
        descriptor.validate()?;

        let session = Arc::new(SessionShared::new(
            descriptor,
            self.inner.policy,
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.backend),
            self.inner.runtime.clone(),
        ));

        let previous = self.inner.replace_current(Arc::clone(&session));

        tracing::info!(
            session_id = %session.id,
            id = %session.descriptor.id,
            "Submitting generation request"
        );

        if let Some(previous) = previous {
            tracing::info!(
                session_id = %previous.id,
                superseded_by = %session.id,
                "Superseding previous session"
            );
            previous.end(SessionEvent::Supersede);
        }

        self.inner.runtime.spawn(Arc::clone(&session).drive());
        Ok(SessionHandle::new(session))
    }

    /// The slot's UI element was closed: end the current session, if any.
    pub fn dismiss(&self) -> Option<SessionId> {
        let current = self.inner.take_current();
        current.map(|session| {
            session.end(SessionEvent::Dismiss);
            session.id
        })
    }

    pub fn current(&self) -> Option<SessionHandle> {
        self.inner
            .lock_current()
            .as_ref()
            .map(|session| SessionHandle::new(Arc::clone(session)))
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.inner
            .lock_current()
            .as_ref()
            .is_some_and(|session| session.id == id)
    }

    pub fn policy(&self) -> PollPolicy {
        self.inner.policy
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("current", &self.inner.lock_current().as_ref().map(|s| s.id))
            .field("policy", &self.inner.policy)
            .finish()
    }
}
