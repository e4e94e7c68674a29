use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, LazyLock, OnceLock},
    time::Duration,
};

use clap::Parser;
use rama::{
    Layer as _, Service,
    error::BoxError,
    http::{
        Request, Response, client::EasyHttpWebClient,
        layer::map_request_body::MapRequestBodyLayer,
    },
    layer::TimeoutLayer,
    net::address::SocketAddress,
    rt::Executor,
};

use crate::Args;

#[derive(Clone)]
pub(super) struct Runtime {
    _app: App,

    ingest_addr: SocketAddress,
}

impl Runtime {
    #[inline(always)]
    pub fn ingest_addr(&self) -> SocketAddress {
        self.ingest_addr
    }

    #[inline(always)]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.ingest_addr)
    }

    #[inline(always)]
    pub fn client(&self) -> impl Service<Request, Output = Response, Error = BoxError> {
        new_client()
    }
}

pub(super) fn new_client() -> impl Service<Request, Output = Response, Error = BoxError> {
    let inner_http_client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(Executor::default())
        .try_with_default_connection_pool()
        .expect("create connection pool for e2e web client")
        .build_client();

    (
        TimeoutLayer::new(Duration::from_secs(30)),
        MapRequestBodyLayer::new_boxed_streaming_body(),
    )
        .into_layer(inner_http_client)
}

#[derive(Clone)]
struct App {
    data_dir: PathBuf,
}

impl App {
    fn new() -> Self {
        let data_dir = spawn_ingest_app_with_args(&[]);
        Self { data_dir }
    }
}

/// Shared ingestion service, spawned once for the whole test binary.
pub(super) async fn get() -> Runtime {
    static APP: LazyLock<App> = LazyLock::new(App::new);

    let app = APP.clone();
    runtime_for_app(app).await
}

/// Dedicated ingestion service, for tests that need their own configuration.
pub(super) async fn spawn_with_args(extra_args: &[&str]) -> Runtime {
    let data_dir = spawn_ingest_app_with_args(extra_args);
    runtime_for_app(App { data_dir }).await
}

async fn runtime_for_app(app: App) -> Runtime {
    let ingest_addr = tokio::time::timeout(
        Duration::from_secs(30),
        read_file_or_wait(app.data_dir.join("ingest.addr.txt")),
    )
    .await
    .unwrap();

    let runtime = Runtime {
        _app: app,
        ingest_addr,
    };

    assert!(runtime.ingest_addr().ip_addr.is_loopback());

    runtime
}

pub(super) async fn read_file_or_wait(path: PathBuf) -> SocketAddress {
    loop {
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => {
                let s = s.trim();
                if s.is_empty() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                match s.parse() {
                    Ok(addr) => return addr,
                    Err(err) => {
                        eprintln!("unexpected error parsing socket addr (content={s:?}): {err}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                }
            }
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                } else {
                    panic!("unexpected error: {err}");
                }
            }
        }
    }
}

pub(super) fn new_args(data_dir: &str, extra_args: &[&str]) -> Args {
    let mut argv: Vec<&str> = vec![
        "eventpipe-ingest",
        "--bind",
        "127.0.0.1:0",
        "--data",
        data_dir,
        "--graceful",
        "0.42",
    ];
    argv.extend(extra_args);

    Args::try_parse_from(argv).unwrap()
}

fn spawn_ingest_app_with_args(extra_args: &[&str]) -> PathBuf {
    let data_dir = crate::test::tmp_dir::try_new("eventpipe_ingest_e2e").unwrap();
    eprintln!("eventpipe_ingest_e2e all data stored under: {data_dir:?}");

    let data_dir_str = data_dir.display().to_string().leak();
    let args = new_args(data_dir_str, extra_args);

    let wait_server_ready = Arc::new(OnceLock::new());
    let notify_server_ready = wait_server_ready.clone();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        let server_future = crate::run_with_args(std::future::pending::<()>(), args);

        notify_server_ready.set(()).expect("waiter to be nofified");

        rt.block_on(server_future).expect("serve without errors");
    });

    wait_server_ready.wait();

    data_dir
}
