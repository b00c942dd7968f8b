//! Livepub Artifact Materialization
//!
//! Fetches server-generated artifacts that do not exist yet at request time:
//! - Generation request against the publication backend
//! - Bounded, fixed-interval polling until the artifact is available
//! - Supersession guard so only the current session of a slot may render
//! - Best-effort deletion bound to the lifetime of the consuming UI slot
//!
//! Backends are pluggable through [`GenerationBackend`]: [`client::HttpBackend`]
//! talks to the real service, [`mock::MockBackend`] is programmable for tests.

pub mod client;
pub mod listener;
pub mod mock;
pub mod poll;
pub mod profile;
pub mod session;
pub mod slot;
pub mod state;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use listener::{ChannelListener, SlotEvent, SlotListener};
pub use poll::{PollPolicy, PollState};
pub use profile::PublicationProfile;
pub use session::{CleanupStatus, ReadyArtifact, SessionHandle, SessionId, SessionSnapshot};
pub use slot::{Materializer, Slot};
pub use state::{FailureReason, SessionEvent, SessionState, SessionStateMachine};

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Materialize configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid artifact handle: {0}")]
    InvalidHandle(String),

    #[error("Materialize request error: {0}")]
    Request(String),

    #[error("Materialize response error: {0}")]
    Response(String),
}

/// Identifying payload for one generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
}

impl RequestDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: serde_json::Value) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// The backend requires a non-blank `id`
    pub fn validate(&self) -> Result<(), MaterializeError> {
        if self.id.trim().is_empty() {
            return Err(MaterializeError::InvalidDescriptor(
                "id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server-assigned artifact filename
///
/// The value ends up in URL paths (`/tmp/{filename}`, `/delete/{filename}`),
/// so anything that could escape the path segment is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    pub fn new(filename: impl Into<String>) -> Result<Self, MaterializeError> {
        let filename = filename.into();
        if filename.is_empty() {
            return Err(MaterializeError::InvalidHandle(
                "filename must not be empty".to_string(),
            ));
        }
        if filename == "." || filename == ".." || filename.contains(['/', '\\']) {
            return Err(MaterializeError::InvalidHandle(format!(
                "filename is not a single path segment: {filename}"
            )));
        }
        Ok(Self(filename))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactHandle {
    type Error = MaterializeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactHandle> for String {
    fn from(handle: ArtifactHandle) -> Self {
        handle.0
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body returned by `POST {base}/request`
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    pub filename: String,
}

/// Result of an existence probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    /// Carries the HTTP status the backend answered with
    NotReady(u16),
}

/// Result of a deletion the backend accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// 404: never finished, or already removed
    AlreadyGone,
}

/// Generation backend contract
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Ask the backend to start generating an artifact.
    async fn request_generation(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<ArtifactHandle, MaterializeError>;

    /// Lightweight existence check against the artifact location.
    async fn probe(&self, handle: &ArtifactHandle) -> Result<ProbeOutcome, MaterializeError>;

    /// Remove the artifact and its intermediates.
    async fn delete(&self, handle: &ArtifactHandle) -> Result<DeleteOutcome, MaterializeError>;

    /// Location the ready artifact can be fetched from.
    fn artifact_url(&self, handle: &ArtifactHandle) -> String;
}

const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend provider (http, mock)
    pub provider: String,
    /// Base URL of the publication service, without trailing slash
    pub base_url: String,
    /// Per-call timeout for HTTP requests
    pub http_timeout: Duration,
}

impl BackendConfig {
    /// Create backend config from environment variables.
    ///
    /// `LIVEPUB_BASE_URL` wins; otherwise the profile picks a local or remote
    /// base depending on `LIVEPUB_HOST`.
    pub fn from_env(profile: PublicationProfile) -> Result<Self, MaterializeError> {
        use livepub_common::config::{env_opt, env_or, env_positive};

        let provider = env_or("LIVEPUB_PROVIDER", "http");
        let base_url = match env_opt("LIVEPUB_BASE_URL") {
            Some(url) => url,
            None => profile.base_url_for_host(&env_or("LIVEPUB_HOST", "localhost")),
        };
        let http_timeout_ms = env_positive("LIVEPUB_HTTP_TIMEOUT_MS")
            .map_err(|e| MaterializeError::Configuration(format!("{e:#}")))?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);

        let config = Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_timeout: Duration::from_millis(http_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MaterializeError> {
        if self.provider == "http"
            && !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://"))
        {
            return Err(MaterializeError::Configuration(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// Factory for creating GenerationBackend implementations
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        config: BackendConfig,
    ) -> Result<std::sync::Arc<dyn GenerationBackend>, MaterializeError> {
        match config.provider.as_str() {
            "http" => {
                tracing::info!(base_url = %config.base_url, "Creating HTTP generation backend");
                config.validate()?;
                Ok(std::sync::Arc::new(client::HttpBackend::new(&config)?))
            }
            "mock" => {
                tracing::info!("Creating mock generation backend");
                Ok(std::sync::Arc::new(mock::MockBackend::new(config.base_url)))
            }
            provider => Err(MaterializeError::Configuration(format!(
                "Unknown backend provider: {}. Supported providers: http, mock",
                provider
            ))),
        }
    }
}
