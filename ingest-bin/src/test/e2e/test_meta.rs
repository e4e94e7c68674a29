use rama::http::{
    BodyExtractExt, StatusCode, header::SERVER, service::client::HttpClientExt as _,
};

use eventpipe_ingest_lib::{http::HealthResponse, utils::env::network_service_identifier};

use super::runtime;

#[tokio::test]
#[tracing_test::traced_test]
async fn test_ping() {
    let runtime = runtime::get().await;
    let client = runtime.client();

    let resp = client.get(runtime.url("/ping")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(SERVER).and_then(|v| v.to_str().ok()),
        Some(network_service_identifier())
    );

    let payload = resp.try_into_string().await.unwrap();
    assert_eq!(payload, "pong");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_health() {
    let runtime = runtime::get().await;
    let client = runtime.client();

    let resp = client.get(runtime.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let health: HealthResponse = resp.try_into_json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.capacity, 10_000);
    assert_eq!(health.consumers, "running");
    assert!(!health.time.is_empty());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unknown_route() {
    let runtime = runtime::get().await;
    let client = runtime.client();

    let resp = client.get(runtime.url("/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
