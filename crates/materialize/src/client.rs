//! Publication Service HTTP Client
//!
//! Real HTTP backend for the publication service:
//! - `POST {base}/request` starts generation and returns `{"filename": ...}`
//! - `HEAD {base}/tmp/{filename}` answers 2xx once the artifact exists
//! - `DELETE {base}/delete/{filename}` removes it (404 when already gone)

use reqwest::{StatusCode, Url};

use crate::{
    ArtifactHandle, BackendConfig, DeleteOutcome, GenerationBackend, GenerationResponse,
    MaterializeError, ProbeOutcome, RequestDescriptor,
};

/// reqwest-backed implementation of [`GenerationBackend`].
pub struct HttpBackend {
    http: reqwest::Client,
    base: Url,
    base_url: String,
}

impl HttpBackend {
    /// Create a new backend client from configuration.
    pub fn new(config: &BackendConfig) -> Result<Self, MaterializeError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| MaterializeError::Configuration(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| MaterializeError::Configuration(format!("invalid base URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(MaterializeError::Configuration(format!(
                "base URL cannot carry paths: {base_url}"
            )));
        }

        Ok(Self {
            http,
            base,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/{route}/{filename}`, with the filename percent-encoded as a
    /// single path segment.
    fn resource_url(&self, route: &str, handle: &ArtifactHandle) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(route).push(handle.as_str());
        }
        url
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HttpBackend {
    async fn request_generation(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<ArtifactHandle, MaterializeError> {
        descriptor.validate()?;

        let url = format!("{}/request", self.base_url);
        tracing::debug!(url = %url, id = %descriptor.id, "Sending generation request");

        let response = self
            .http
            .post(&url)
            .json(descriptor)
            .send()
            .await
            .map_err(|e| MaterializeError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            return Err(MaterializeError::Response(format!(
                "Publication service returned {}: {}",
                status, body
            )));
        }

        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|e| MaterializeError::Response(format!("Invalid generation response: {e}")))?;

        ArtifactHandle::new(body.filename)
    }

    async fn probe(&self, handle: &ArtifactHandle) -> Result<ProbeOutcome, MaterializeError> {
        let response = self
            .http
            .head(self.resource_url("tmp", handle))
            .send()
            .await
            .map_err(|e| MaterializeError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(ProbeOutcome::Ready)
        } else {
            Ok(ProbeOutcome::NotReady(status.as_u16()))
        }
    }

    async fn delete(&self, handle: &ArtifactHandle) -> Result<DeleteOutcome, MaterializeError> {
        let response = self
            .http
            .delete(self.resource_url("delete", handle))
            .send()
            .await
            .map_err(|e| MaterializeError::Request(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyGone),
            status => Err(MaterializeError::Response(format!(
                "Delete of {} returned {}",
                handle, status
            ))),
        }
    }

    fn artifact_url(&self, handle: &ArtifactHandle) -> String {
        self.resource_url("tmp", handle).into()
    }
}
