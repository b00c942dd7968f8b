//! HTTP backend against a stand-in publication service
//!
//! Checks the wire contract: request body and response parsing, existence
//! probes, and how delete statuses map onto outcomes.

mod common;

use common::TestService;
use livepub_materialize::client::HttpBackend;
use livepub_materialize::{
    ArtifactHandle, DeleteOutcome, GenerationBackend, MaterializeError, ProbeOutcome,
    RequestDescriptor,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[test_log::test(tokio::test)]
async fn test_request_posts_descriptor_and_returns_handle() {
    let service = TestService::start().await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "id": "T1",
            "geometry": { "type": "Point", "coordinates": [151.2, -33.9] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "filename": "T1_ab12.html" })))
        .expect(1)
        .mount(&service.server)
        .await;

    let descriptor = RequestDescriptor::new("T1")
        .with_geometry(json!({ "type": "Point", "coordinates": [151.2, -33.9] }));
    let handle = service
        .backend()
        .request_generation(&descriptor)
        .await
        .unwrap();

    assert_eq!(handle.as_str(), "T1_ab12.html");
}

#[test_log::test(tokio::test)]
async fn test_request_omits_missing_geometry() {
    let service = TestService::start().await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .and(body_json(json!({ "id": "T7" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "filename": "T7.html" })))
        .expect(1)
        .mount(&service.server)
        .await;

    let handle = service
        .backend()
        .request_generation(&RequestDescriptor::new("T7"))
        .await
        .unwrap();
    assert_eq!(handle.as_str(), "T7.html");
}

#[test_log::test(tokio::test)]
async fn test_request_non_success_status_is_error() {
    let service = TestService::start().await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .respond_with(ResponseTemplate::new(500).set_body_string("generator crashed"))
        .mount(&service.server)
        .await;

    let err = service
        .backend()
        .request_generation(&RequestDescriptor::new("T1"))
        .await
        .unwrap_err();

    match err {
        MaterializeError::Response(message) => {
            assert!(message.contains("500"));
            assert!(message.contains("generator crashed"));
        }
        other => panic!("Expected response error, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_request_rejects_unsafe_filename() {
    let service = TestService::start().await;
    service.accept_requests("../etc/passwd").await;

    let err = service
        .backend()
        .request_generation(&RequestDescriptor::new("T1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::InvalidHandle(_)));
}

#[test_log::test(tokio::test)]
async fn test_request_malformed_body_is_error() {
    let service = TestService::start().await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "x.html" })))
        .mount(&service.server)
        .await;

    let err = service
        .backend()
        .request_generation(&RequestDescriptor::new("T1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Response(_)));
}

#[test_log::test(tokio::test)]
async fn test_probe_reports_not_ready_then_ready() {
    let service = TestService::start().await;
    service.ready_after("a.html", 2).await;
    let backend = service.backend();
    let handle = ArtifactHandle::new("a.html").unwrap();

    assert_eq!(backend.probe(&handle).await.unwrap(), ProbeOutcome::NotReady(404));
    assert_eq!(backend.probe(&handle).await.unwrap(), ProbeOutcome::NotReady(404));
    assert_eq!(backend.probe(&handle).await.unwrap(), ProbeOutcome::Ready);

    assert_eq!(
        service.paths_for("HEAD").await,
        vec!["/tmp/a.html", "/tmp/a.html", "/tmp/a.html"]
    );
}

#[test_log::test(tokio::test)]
async fn test_probe_server_error_is_not_ready() {
    let service = TestService::start().await;
    Mock::given(method("HEAD"))
        .and(path("/tmp/a.html"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&service.server)
        .await;

    let outcome = service
        .backend()
        .probe(&ArtifactHandle::new("a.html").unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, ProbeOutcome::NotReady(503));
}

#[test_log::test(tokio::test)]
async fn test_delete_maps_statuses() {
    let service = TestService::start().await;
    service.accept_deletes("done.html", 200).await;
    service.accept_deletes("gone.html", 404).await;
    service.accept_deletes("stuck.html", 500).await;
    let backend = service.backend();

    assert_eq!(
        backend.delete(&ArtifactHandle::new("done.html").unwrap()).await.unwrap(),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        backend.delete(&ArtifactHandle::new("gone.html").unwrap()).await.unwrap(),
        DeleteOutcome::AlreadyGone
    );
    let err = backend
        .delete(&ArtifactHandle::new("stuck.html").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Response(_)));
}

#[test_log::test(tokio::test)]
async fn test_unreachable_service_is_request_error() {
    let mut config = TestService::start().await.config();
    // Nothing listens on port 1
    config.base_url = "http://127.0.0.1:1".to_string();
    let backend = HttpBackend::new(&config).unwrap();

    let err = backend
        .probe(&ArtifactHandle::new("a.html").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Request(_)));
}

#[test_log::test(tokio::test)]
async fn test_artifact_url_points_at_tmp() {
    let service = TestService::start().await;
    let url = service
        .backend()
        .artifact_url(&ArtifactHandle::new("a.html").unwrap());
    assert_eq!(url, format!("{}/tmp/a.html", service.base_url()));
}

#[test_log::test(tokio::test)]
async fn test_reserved_characters_stay_inside_the_filename() {
    let service = TestService::start().await;
    service.ready_after("a%231.html", 0).await;
    service.accept_deletes("a%231.html", 200).await;
    let backend = service.backend();
    let handle = ArtifactHandle::new("a#1.html").unwrap();

    assert_eq!(backend.probe(&handle).await.unwrap(), ProbeOutcome::Ready);
    assert_eq!(backend.delete(&handle).await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(service.paths_for("HEAD").await, vec!["/tmp/a%231.html"]);
    assert_eq!(service.paths_for("DELETE").await, vec!["/delete/a%231.html"]);
}
