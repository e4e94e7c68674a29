//! HTTP surface of the ingestion service.
//!
//! - `POST /events`: admit a single event or a batch (see [`ingest`])
//! - `GET /health`: liveness plus queue and consumer statistics
//! - `GET /ping`: plain `pong`

use std::{convert::Infallible, sync::Arc};

use rama::{
    Service,
    http::{Request, Response, service::web::Router},
};

use crate::{consumer::ConsumerStats, queue::EventQueue};

mod health;
mod ingest;
mod types;

pub use self::types::{ErrorResponse, HealthResponse, IngestResponse};

/// Shared state handed to the endpoint handlers.
#[derive(Debug, Clone)]
pub struct IngestState {
    pub queue: EventQueue,
    pub consumers: Arc<ConsumerStats>,
}

/// Creates the ingestion web service (router) on top of the given state.
pub fn new_ingest_http_svc(
    state: IngestState,
) -> impl Service<Request, Output = Response, Error = Infallible> + Clone {
    Arc::new(
        Router::new()
            .with_get("/ping", "pong")
            .with_get("/health", {
                let state = state.clone();
                move || std::future::ready(self::health::health_response(&state))
            })
            .with_post("/events", move |req: Request| {
                let state = state.clone();
                async move { self::ingest::ingest_events(&state.queue, req).await }
            }),
    )
}
