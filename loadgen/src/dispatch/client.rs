use rama::{
    Layer as _, Service as _,
    error::{BoxError, ErrorContext as _, extra::OpaqueError},
    http::{
        HeaderValue, Request, Response, client::EasyHttpWebClient,
        layer::{
            map_request_body::MapRequestBodyLayer, map_response_body::MapResponseBodyLayer,
            required_header::AddRequiredRequestHeadersLayer,
        },
    },
    layer::MapErrLayer,
    rt::Executor,
    service::BoxService,
};

use eventpipe_ingest_lib::utils::env::network_service_identifier;

/// Pooled HTTP(S) client shared by all dispatch workers.
///
/// No timeout layer: every send is bounded by the dispatcher itself,
/// so an expired request can be told apart from a transport failure.
pub fn new_web_client(exec: Executor) -> Result<BoxService<Request, Response, OpaqueError>, BoxError> {
    let inner_client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(exec)
        .try_with_default_connection_pool()
        .context("create connection pool for generator web client")?
        .build_client();

    let client_middleware = (
        MapResponseBodyLayer::new_boxed_streaming_body(),
        MapErrLayer::into_opaque_error(),
        AddRequiredRequestHeadersLayer::new()
            .with_user_agent_header_value(HeaderValue::from_static(network_service_identifier())),
        MapRequestBodyLayer::new_boxed_streaming_body(),
    );

    Ok(client_middleware.into_layer(inner_client).boxed())
}
