//! Common test utilities for integration tests
//!
//! Every test gets its own wiremock server standing in for the publication
//! service, plus a real [`HttpBackend`] pointed at it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use livepub_materialize::client::HttpBackend;
use livepub_materialize::{BackendConfig, GenerationBackend, PollPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Publication service stand-in
pub struct TestService {
    pub server: MockServer,
}

impl TestService {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    pub fn config(&self) -> BackendConfig {
        BackendConfig {
            provider: "http".to_string(),
            base_url: self.base_url(),
            http_timeout: Duration::from_secs(5),
        }
    }

    pub fn backend(&self) -> Arc<dyn GenerationBackend> {
        Arc::new(HttpBackend::new(&self.config()).expect("backend should build"))
    }

    /// `POST /request` answers with the given filename
    pub async fn accept_requests(&self, filename: &str) {
        Mock::given(method("POST"))
            .and(path("/request"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "filename": filename })),
            )
            .mount(&self.server)
            .await;
    }

    /// `HEAD /tmp/{filename}` answers 404 `not_ready` times, then 200
    pub async fn ready_after(&self, filename: &str, not_ready: u64) {
        let artifact = format!("/tmp/{filename}");
        if not_ready > 0 {
            Mock::given(method("HEAD"))
                .and(path(artifact.as_str()))
                .respond_with(ResponseTemplate::new(404))
                .up_to_n_times(not_ready)
                .mount(&self.server)
                .await;
        }
        Mock::given(method("HEAD"))
            .and(path(artifact.as_str()))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    /// `HEAD /tmp/{filename}` never succeeds
    pub async fn never_ready(&self, filename: &str) {
        Mock::given(method("HEAD"))
            .and(path(format!("/tmp/{filename}").as_str()))
            .respond_with(ResponseTemplate::new(404))
            .mount(&self.server)
            .await;
    }

    pub async fn accept_deletes(&self, filename: &str, status: u16) {
        Mock::given(method("DELETE"))
            .and(path(format!("/delete/{filename}").as_str()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Paths of every request of the given method the server has seen
    pub async fn paths_for(&self, verb: &str) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.method.as_str() == verb)
            .map(|request| request.url.path().to_string())
            .collect()
    }
}

/// Short real-time policy; wiremock needs a running clock
pub fn fast_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy::new(max_attempts, Duration::from_millis(20)).expect("policy should be valid")
}
