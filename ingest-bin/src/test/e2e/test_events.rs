use rama::http::{
    BodyExtractExt, StatusCode, header::RETRY_AFTER, service::client::HttpClientExt as _,
};
use serde_json::json;

use eventpipe_ingest_lib::http::{ErrorResponse, IngestResponse};

use super::runtime;

#[tokio::test]
#[tracing_test::traced_test]
async fn test_post_single_event() {
    let runtime = runtime::get().await;
    let client = runtime.client();

    let resp = client
        .post(runtime.url("/events"))
        .json(&json!({"event_type": "page_view", "value": 1.5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: IngestResponse = resp.try_into_json().await.unwrap();
    assert_eq!(body.accepted, 1);
    assert!(!body.timestamp.is_empty());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_post_batch() {
    let runtime = runtime::get().await;
    let client = runtime.client();

    let resp = client
        .post(runtime.url("/events"))
        .json(&json!([
            {"event_type": "click", "value": 1},
            {"event_type": "click", "value": 2},
            {"event_type": "scroll", "value": 3},
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: IngestResponse = resp.try_into_json().await.unwrap();
    assert_eq!(body.accepted, 3);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_post_malformed_body() {
    let runtime = runtime::get().await;
    let client = runtime.client();

    let resp = client
        .post(runtime.url("/events"))
        .body("{definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = resp.try_into_json().await.unwrap();
    assert_eq!(body.error, "malformed_body");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_batch_larger_than_capacity_is_rejected() {
    let runtime = runtime::spawn_with_args(&["--capacity", "2", "--consumers", "1"]).await;
    let client = runtime.client();

    let resp = client
        .post(runtime.url("/events"))
        .json(&json!([{"n": 1}, {"n": 2}, {"n": 3}]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(RETRY_AFTER));

    let body: ErrorResponse = resp.try_into_json().await.unwrap();
    assert_eq!(body.error, "queue_full");
    assert_eq!(body.capacity, 2);

    let resp = client
        .post(runtime.url("/events"))
        .json(&json!([{"n": 1}, {"n": 2}]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
