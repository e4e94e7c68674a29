use std::{sync::Arc, time::Duration};

use rama::{
    Layer,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
    },
    layer::TimeoutLayer,
    net::stream::layer::http::BodyLimitLayer,
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use eventpipe_ingest_lib::{
    http::{IngestState, new_ingest_http_svc},
    utils::env::network_service_identifier,
};

use crate::Args;

/// Largest ingestion body (single event or batch) accepted.
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_ingest_server(
    args: Args,
    guard: ShutdownGuard,
    tcp_listener: TcpListener,
    state: IngestState,
) -> Result<(), BoxError> {
    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(network_service_identifier())),
        TimeoutLayer::new(REQUEST_TIMEOUT),
    )
        .into_layer(new_ingest_http_svc(state));

    let exec = Executor::graceful(guard);
    let http_server = HttpServer::auto(exec).service(Arc::new(http_svc));

    let tcp_svc = BodyLimitLayer::symmetric(MAX_BODY_SIZE).into_layer(http_server);

    let ingest_addr = tcp_listener
        .local_addr()
        .context("get bound address for ingest http server")?;

    tracing::info!(
        server.address = %ingest_addr,
        capacity = args.capacity,
        consumers = args.consumers,
        "ingest http server ready",
    );

    if let Some(ref dir) = args.data {
        crate::server::write_server_socket_address_as_file(dir, "ingest", ingest_addr.into())
            .await?;
    }

    tcp_listener.serve(tcp_svc).await;

    Ok(())
}
