//! Mock Generation Backend
//!
//! Programmable in-memory backend for testing materialization workflows:
//! - `MockBackend`: records every call with its (Tokio) timestamp
//! - `MockBackendBehavior`: scripted request outcomes, delays, filenames,
//!   per-artifact probe scripts and delete outcomes
//!
//! Delays use `tokio::time::sleep`, so tests running on a paused clock see
//! deterministic timings.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    ArtifactHandle, DeleteOutcome, GenerationBackend, MaterializeError, ProbeOutcome,
    RequestDescriptor,
};

/// How the mock answers a generation request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MockRequest {
    /// Assign the next filename
    #[default]
    Assign,
    /// Non-2xx response
    ServerError,
    /// Connection failure
    TransportError,
}

/// How the mock answers an existence probe
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MockProbe {
    #[default]
    Ready,
    /// 404, still generating
    NotReady,
    /// Connection failure
    Error,
}

/// How the mock answers a deletion
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MockDelete {
    #[default]
    Deleted,
    NotFound,
    ServerError,
    TransportError,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Programmable behavior for the mock backend
#[derive(Debug, Default)]
pub struct MockBackendBehavior {
    request_outcomes: RwLock<VecDeque<MockRequest>>,
    default_request: RwLock<MockRequest>,
    request_delays: RwLock<VecDeque<u64>>,
    default_request_delay_ms: RwLock<u64>,
    filenames: RwLock<VecDeque<String>>,
    probe_scripts: RwLock<HashMap<String, VecDeque<MockProbe>>>,
    default_probe: RwLock<MockProbe>,
    probe_delay_ms: RwLock<u64>,
    delete_outcome: RwLock<MockDelete>,
}

impl MockBackendBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome for every request not covered by `queue_request_outcomes`
    pub fn set_request_outcome(&self, outcome: MockRequest) {
        *write(&self.default_request) = outcome;
    }

    /// Outcomes for the next requests, in order
    pub fn queue_request_outcomes(&self, outcomes: impl IntoIterator<Item = MockRequest>) {
        write(&self.request_outcomes).extend(outcomes);
    }

    pub fn set_request_delay_ms(&self, delay: u64) {
        *write(&self.default_request_delay_ms) = delay;
    }

    /// Delays for the next requests, in order; lets a later request
    /// resolve before an earlier one.
    pub fn queue_request_delays_ms(&self, delays: impl IntoIterator<Item = u64>) {
        write(&self.request_delays).extend(delays);
    }

    /// Filenames for the next successful requests, in order
    pub fn queue_filenames<S: Into<String>>(&self, filenames: impl IntoIterator<Item = S>) {
        write(&self.filenames).extend(filenames.into_iter().map(Into::into));
    }

    /// Answers for successive probes of one artifact; afterwards the default applies
    pub fn script_probes(&self, filename: &str, probes: impl IntoIterator<Item = MockProbe>) {
        write(&self.probe_scripts)
            .entry(filename.to_string())
            .or_default()
            .extend(probes);
    }

    pub fn set_default_probe(&self, probe: MockProbe) {
        *write(&self.default_probe) = probe;
    }

    pub fn set_probe_delay_ms(&self, delay: u64) {
        *write(&self.probe_delay_ms) = delay;
    }

    pub fn set_delete_outcome(&self, outcome: MockDelete) {
        *write(&self.delete_outcome) = outcome;
    }

    /// Reset to default behavior
    pub fn reset(&self) {
        write(&self.request_outcomes).clear();
        *write(&self.default_request) = MockRequest::default();
        write(&self.request_delays).clear();
        *write(&self.default_request_delay_ms) = 0;
        write(&self.filenames).clear();
        write(&self.probe_scripts).clear();
        *write(&self.default_probe) = MockProbe::default();
        *write(&self.probe_delay_ms) = 0;
        *write(&self.delete_outcome) = MockDelete::default();
    }

    fn next_request(&self) -> (MockRequest, u64) {
        let outcome = write(&self.request_outcomes)
            .pop_front()
            .unwrap_or_else(|| *read(&self.default_request));
        let delay = write(&self.request_delays)
            .pop_front()
            .unwrap_or_else(|| *read(&self.default_request_delay_ms));
        (outcome, delay)
    }

    fn next_probe(&self, filename: &str) -> MockProbe {
        write(&self.probe_scripts)
            .get_mut(filename)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| *read(&self.default_probe))
    }
}

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Request(RequestDescriptor),
    Probe(ArtifactHandle),
    Delete(ArtifactHandle),
}

#[derive(Debug, Clone)]
pub struct RecordedEntry {
    pub call: RecordedCall,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct ProbeAccounting {
    in_flight: HashMap<ArtifactHandle, usize>,
    max_in_flight: usize,
}

/// Mock backend with programmable behavior
#[derive(Debug, Clone)]
pub struct MockBackend {
    behavior: Arc<MockBackendBehavior>,
    history: Arc<Mutex<Vec<RecordedEntry>>>,
    probes: Arc<Mutex<ProbeAccounting>>,
    counter: Arc<AtomicU64>,
    base_url: String,
}

impl MockBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_behavior(Arc::new(MockBackendBehavior::new()), base_url)
    }

    pub fn with_behavior(behavior: Arc<MockBackendBehavior>, base_url: impl Into<String>) -> Self {
        Self {
            behavior,
            history: Arc::new(Mutex::new(Vec::new())),
            probes: Arc::new(Mutex::new(ProbeAccounting::default())),
            counter: Arc::new(AtomicU64::new(0)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the shared behavior for configuration
    pub fn behavior(&self) -> &Arc<MockBackendBehavior> {
        &self.behavior
    }

    /// Get every recorded call, oldest first
    pub fn recorded_calls(&self) -> Vec<RecordedEntry> {
        lock(&self.history).clone()
    }

    pub fn recorded_requests(&self) -> Vec<RequestDescriptor> {
        self.filter_calls(|call| match call {
            RecordedCall::Request(descriptor) => Some(descriptor.clone()),
            _ => None,
        })
    }

    pub fn recorded_deletes(&self) -> Vec<ArtifactHandle> {
        self.filter_calls(|call| match call {
            RecordedCall::Delete(handle) => Some(handle.clone()),
            _ => None,
        })
    }

    /// Timestamps of every probe of one artifact
    pub fn probe_times(&self, handle: &ArtifactHandle) -> Vec<Instant> {
        lock(&self.history)
            .iter()
            .filter(|entry| matches!(&entry.call, RecordedCall::Probe(h) if h == handle))
            .map(|entry| entry.at)
            .collect()
    }

    pub fn probe_count(&self, handle: &ArtifactHandle) -> usize {
        self.probe_times(handle).len()
    }

    /// Highest number of concurrently outstanding probes seen for any one artifact
    pub fn max_in_flight_probes(&self) -> usize {
        lock(&self.probes).max_in_flight
    }

    /// Clear history
    pub fn reset_history(&self) {
        lock(&self.history).clear();
        *lock(&self.probes) = ProbeAccounting::default();
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record(&self, call: RecordedCall) {
        lock(&self.history).push(RecordedEntry {
            call,
            at: Instant::now(),
        });
    }

    fn filter_calls<T>(&self, f: impl Fn(&RecordedCall) -> Option<T>) -> Vec<T> {
        lock(&self.history)
            .iter()
            .filter_map(|entry| f(&entry.call))
            .collect()
    }

    fn next_filename(&self, descriptor: &RequestDescriptor) -> String {
        write(&self.behavior.filenames)
            .pop_front()
            .unwrap_or_else(|| {
                let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
                format!("{}_{:04}.html", descriptor.id, n)
            })
    }
}

#[async_trait::async_trait]
impl GenerationBackend for MockBackend {
    async fn request_generation(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<ArtifactHandle, MaterializeError> {
        tracing::debug!(id = %descriptor.id, "Mock backend: received generation request");
        self.record(RecordedCall::Request(descriptor.clone()));
        descriptor.validate()?;

        let (outcome, delay_ms) = self.behavior.next_request();
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match outcome {
            MockRequest::Assign => ArtifactHandle::new(self.next_filename(descriptor)),
            MockRequest::ServerError => Err(MaterializeError::Response(
                "Publication service returned 500 Internal Server Error: mock failure".to_string(),
            )),
            MockRequest::TransportError => Err(MaterializeError::Request(
                "mock connection refused".to_string(),
            )),
        }
    }

    async fn probe(&self, handle: &ArtifactHandle) -> Result<ProbeOutcome, MaterializeError> {
        self.record(RecordedCall::Probe(handle.clone()));
        {
            let mut probes = lock(&self.probes);
            let in_flight = probes.in_flight.entry(handle.clone()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            probes.max_in_flight = probes.max_in_flight.max(current);
        }

        let delay_ms = *read(&self.behavior.probe_delay_ms);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let probe = self.behavior.next_probe(handle.as_str());

        if let Some(in_flight) = lock(&self.probes).in_flight.get_mut(handle) {
            *in_flight = in_flight.saturating_sub(1);
        }

        match probe {
            MockProbe::Ready => Ok(ProbeOutcome::Ready),
            MockProbe::NotReady => Ok(ProbeOutcome::NotReady(404)),
            MockProbe::Error => Err(MaterializeError::Request(
                "mock connection reset".to_string(),
            )),
        }
    }

    async fn delete(&self, handle: &ArtifactHandle) -> Result<DeleteOutcome, MaterializeError> {
        tracing::debug!(filename = %handle, "Mock backend: received delete");
        self.record(RecordedCall::Delete(handle.clone()));

        match *read(&self.behavior.delete_outcome) {
            MockDelete::Deleted => Ok(DeleteOutcome::Deleted),
            MockDelete::NotFound => Ok(DeleteOutcome::AlreadyGone),
            MockDelete::ServerError => Err(MaterializeError::Response(format!(
                "Delete of {} returned 500 Internal Server Error",
                handle
            ))),
            MockDelete::TransportError => Err(MaterializeError::Request(
                "mock connection refused".to_string(),
            )),
        }
    }

    fn artifact_url(&self, handle: &ArtifactHandle) -> String {
        format!("{}/tmp/{}", self.base_url, handle)
    }
}
