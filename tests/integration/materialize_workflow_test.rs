//! End-to-end slot workflows over HTTP
//!
//! Drives a real [`Slot`] and [`HttpBackend`](livepub_materialize::client::HttpBackend)
//! against a stand-in publication service with short real-time intervals.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_policy, TestService};
use livepub_materialize::{
    ChannelListener, CleanupStatus, FailureReason, Materializer, RequestDescriptor,
    SessionState, Slot, SlotEvent,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn slot_for(service: &TestService, max_attempts: u32) -> (Slot, UnboundedReceiver<SlotEvent>) {
    let materializer = Materializer::new(service.backend(), fast_policy(max_attempts)).unwrap();
    let (listener, events) = ChannelListener::new();
    (materializer.slot(Arc::new(listener)), events)
}

/// Next ready or failed event, skipping progress
async fn next_outcome(events: &mut UnboundedReceiver<SlotEvent>) -> SlotEvent {
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for a slot event")
            .expect("listener channel closed");
        if !matches!(event, SlotEvent::Progress { .. }) {
            return event;
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_publication_ready_then_deleted_on_dismiss() {
    let service = TestService::start().await;
    service.accept_requests("T1_0001.html").await;
    service.ready_after("T1_0001.html", 2).await;
    service.accept_deletes("T1_0001.html", 200).await;

    let (slot, mut events) = slot_for(&service, 10);
    let session = slot.submit(RequestDescriptor::new("T1")).unwrap();

    match next_outcome(&mut events).await {
        SlotEvent::Ready(artifact) => {
            assert_eq!(artifact.session, session.id());
            assert_eq!(
                artifact.url,
                format!("{}/tmp/T1_0001.html", service.base_url())
            );
        }
        other => panic!("Expected ready event, got {other:?}"),
    }
    assert_eq!(service.paths_for("HEAD").await.len(), 3);
    assert!(service.paths_for("DELETE").await.is_empty());

    assert_eq!(slot.dismiss(), Some(session.id()));
    let cleanup = tokio::time::timeout(WAIT, session.cleanup_settled())
        .await
        .unwrap();

    assert_eq!(cleanup, CleanupStatus::Deleted);
    assert_eq!(session.state(), SessionState::Dismissed);
    assert_eq!(
        service.paths_for("DELETE").await,
        vec!["/delete/T1_0001.html"]
    );
}

#[test_log::test(tokio::test)]
async fn test_publication_times_out_after_max_probes() {
    let service = TestService::start().await;
    service.accept_requests("slow.html").await;
    service.never_ready("slow.html").await;
    service.accept_deletes("slow.html", 404).await;

    let (slot, mut events) = slot_for(&service, 3);
    let session = slot.submit(RequestDescriptor::new("T1")).unwrap();

    assert_eq!(
        next_outcome(&mut events).await,
        SlotEvent::Failed {
            session: session.id(),
            reason: FailureReason::Timeout
        }
    );
    assert_eq!(service.paths_for("HEAD").await.len(), 3);

    // The handle was assigned, so closing still asks for deletion
    slot.dismiss();
    let cleanup = tokio::time::timeout(WAIT, session.cleanup_settled())
        .await
        .unwrap();
    assert_eq!(cleanup, CleanupStatus::AlreadyGone);
}

#[test_log::test(tokio::test)]
async fn test_request_failure_is_reported_without_delete() {
    let service = TestService::start().await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&service.server)
        .await;

    let (slot, mut events) = slot_for(&service, 3);
    let session = slot.submit(RequestDescriptor::new("T1")).unwrap();

    assert_eq!(
        next_outcome(&mut events).await,
        SlotEvent::Failed {
            session: session.id(),
            reason: FailureReason::RequestFailed
        }
    );
    slot.dismiss();

    assert_eq!(session.cleanup_settled().await, CleanupStatus::Skipped);
    assert!(service.paths_for("HEAD").await.is_empty());
    assert!(service.paths_for("DELETE").await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_superseded_request_is_deleted_and_never_rendered() {
    let service = TestService::start().await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .and(body_json(json!({ "id": "A" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "filename": "a.html" }))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&service.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/request"))
        .and(body_json(json!({ "id": "B" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "filename": "b.html" })))
        .mount(&service.server)
        .await;
    service.ready_after("a.html", 0).await;
    service.ready_after("b.html", 1).await;
    service.accept_deletes("a.html", 200).await;

    let (slot, mut events) = slot_for(&service, 10);
    let first = slot.submit(RequestDescriptor::new("A")).unwrap();
    let second = slot.submit(RequestDescriptor::new("B")).unwrap();

    match next_outcome(&mut events).await {
        SlotEvent::Ready(artifact) => assert_eq!(artifact.session, second.id()),
        other => panic!("Expected ready event for B, got {other:?}"),
    }

    let cleanup = tokio::time::timeout(WAIT, first.cleanup_settled())
        .await
        .unwrap();
    assert_eq!(cleanup, CleanupStatus::Deleted);
    assert_eq!(first.state(), SessionState::Superseded);
    assert!(!service
        .paths_for("HEAD")
        .await
        .contains(&"/tmp/a.html".to_string()));
    assert!(events.try_recv().is_err());
}
