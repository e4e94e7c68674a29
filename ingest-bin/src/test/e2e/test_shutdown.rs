use std::time::Duration;

use rama::http::{StatusCode, service::client::HttpClientExt as _};
use serde_json::json;

use super::runtime;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_graceful_shutdown_after_traffic() {
    let data_dir = crate::test::tmp_dir::try_new("eventpipe_ingest_e2e_shutdown").unwrap();
    let data_dir_str = data_dir.display().to_string();
    let args = runtime::new_args(
        &data_dir_str,
        &["--consumers", "2", "--work-ms", "5", "--graceful", "10"],
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let app = tokio::spawn(crate::run_with_args(shutdown_rx, args));

    let addr = tokio::time::timeout(
        Duration::from_secs(30),
        runtime::read_file_or_wait(data_dir.join("ingest.addr.txt")),
    )
    .await
    .unwrap();

    let client = runtime::new_client();
    let events: Vec<_> = (0..20).map(|i| json!({"seq": i})).collect();
    let resp = client
        .post(format!("http://{addr}/events"))
        .json(&events)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(15), app)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok(), "{result:?}");
}
