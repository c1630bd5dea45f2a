//! Automation Server client tests against a mock HTTP server


use serde_json::json;
use std::sync::Arc;
use test_helpers::{ats_config, candidates, fast_submitter};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use workqueue_runner::population::{collect_existing_references, populate_queue};
use workqueue_runner::queue::{
    AtsWorkQueue, CheckedOutItem, CompletionNote, QueueError, WorkQueue,
};
use workqueue_runner::testing::MockCandidateSource;

fn page_of(refs: impl Iterator<Item = String>) -> serde_json::Value {
    let items: Vec<_> = refs.map(|r| json!({ "reference": r })).collect();
    json!({ "items": items })
}

async fn queue_for(server: &MockServer) -> AtsWorkQueue {
    AtsWorkQueue::new(ats_config(&server.uri())).unwrap()
}

#[tokio::test]
async fn test_full_page_requires_extra_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/items"))
        .and(query_param("page", "1"))
        .and(query_param("size", "200"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_of((0..200).map(|i| format!("r{i}")))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue_for(&server).await;
    let existing = collect_existing_references(&queue, 200).await.unwrap();

    assert_eq!(existing.len(), 200);
}

#[tokio::test]
async fn test_add_item_posts_wrapped_data() {
    let server = MockServer::start().await;
    let data = json!({"item": {"reference": "ref-0", "data": {"case": 0}}});
    Mock::given(method("POST"))
        .and(path("/workqueues/7/add"))
        .and(body_json(json!({ "data": data, "reference": "ref-0" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": 31, "reference": "ref-0", "data": data })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue_for(&server).await;
    let item = queue.add_item(&data, "ref-0").await.unwrap();

    assert_eq!(item.id, 31);
}

#[tokio::test]
async fn test_population_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/items"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_of(["ref-1".to_string()].into_iter())))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/workqueues/7/add"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(2)
        .mount(&server)
        .await;

    let queue = queue_for(&server).await;
    let source = MockCandidateSource::new(candidates(3));
    let report = populate_queue(&queue, &source, &fast_submitter(2, 1), 200)
        .await
        .unwrap();

    assert_eq!(report.already_queued, 1);
    assert_eq!(report.succeeded, 2);
}

#[tokio::test]
async fn test_server_errors_are_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/workqueues/7/add"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let queue = queue_for(&server).await;
    let source = MockCandidateSource::new(candidates(1));
    let report = populate_queue(&queue, &source, &fast_submitter(1, 3), 200)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_empty_queue_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/next_item"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let queue = queue_for(&server).await;
    assert!(queue.next_item().await.unwrap().is_none());
}

#[tokio::test]
async fn test_checked_out_item_status_updates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workqueues/7/next_item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 55,
            "reference": "ref-0",
            "data": {"item": {"reference": "ref-0", "data": {}}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/workitems/55/status"))
        .and(body_json(json!({
            "status": "completed",
            "message": r#"{"status":"completed","message":"done"}"#
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue: Arc<dyn WorkQueue> = Arc::new(queue_for(&server).await);
    let item = queue.next_item().await.unwrap().unwrap();
    let mut handle = CheckedOutItem::new(queue.clone(), item);

    handle.complete(&CompletionNote::completed("done")).await.unwrap();
    assert!(handle.is_resolved());
}

#[tokio::test]
async fn test_status_error_maps_to_queue_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already resolved"))
        .mount(&server)
        .await;

    let queue = queue_for(&server).await;
    let err = queue.fail(9, "boom").await.unwrap_err();

    match err {
        QueueError::Status { status, body } => {
            assert_eq!(status, 409);
            assert_eq!(body, "already resolved");
        }
        other => panic!("unexpected error: {other}"),
    }
}
