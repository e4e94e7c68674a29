pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// Identifier used as `Server` / `User-Agent` header value
/// by the eventpipe network services.
pub const fn network_service_identifier() -> &'static str {
    concat!("eventpipe/", env!("CARGO_PKG_VERSION"))
}
