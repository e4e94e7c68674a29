use rama::{
    http::{
        HeaderValue, Request, Response, StatusCode,
        body::util::BodyExt as _,
        header::RETRY_AFTER,
        service::web::response::{IntoResponse, Json},
    },
    telemetry::tracing,
};

use super::types::{ErrorResponse, IngestResponse};
use crate::{
    event::parse_batch,
    queue::{AdmissionVerdict, EventQueue, RejectReason},
    utils::time::now_rfc3339_millis,
};

/// Hint (in seconds) sent to clients that hit backpressure.
const RETRY_AFTER_SECONDS: &str = "1";

/// Handles `POST /events`.
///
/// - `200`: the whole batch was queued
/// - `400`: unreadable or malformed body, queue untouched
/// - `429`: queue full, batch rejected as a whole
/// - `503`: queue closed because the service is shutting down
pub(super) async fn ingest_events(queue: &EventQueue, req: Request) -> Response {
    let payload = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::debug!("failed to read ingest request body: {err}");
            return error_response(
                queue,
                StatusCode::BAD_REQUEST,
                "malformed_body",
                format!("unreadable body: {err}"),
            );
        }
    };

    let batch = match parse_batch(&payload) {
        Ok(batch) => batch,
        Err(err) => {
            tracing::debug!("reject malformed ingest body: {err}");
            return error_response(
                queue,
                StatusCode::BAD_REQUEST,
                "malformed_body",
                err.to_string(),
            );
        }
    };

    match queue.submit(batch) {
        AdmissionVerdict::Accepted(accepted) => {
            tracing::trace!(accepted, queue.len = queue.len(), "batch admitted");
            Json(IngestResponse {
                accepted,
                queued_size: queue.len(),
                timestamp: now_rfc3339_millis(),
            })
            .into_response()
        }
        AdmissionVerdict::Rejected(reason @ RejectReason::Full { .. }) => {
            tracing::debug!("batch rejected: {reason}");
            let mut resp = error_response(
                queue,
                StatusCode::TOO_MANY_REQUESTS,
                "queue_full",
                reason.to_string(),
            );
            resp.headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECONDS));
            resp
        }
        AdmissionVerdict::Rejected(reason @ RejectReason::Closed) => {
            tracing::debug!("batch rejected: {reason}");
            error_response(
                queue,
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                reason.to_string(),
            )
        }
    }
}

fn error_response(
    queue: &EventQueue,
    status: StatusCode,
    error: &'static str,
    detail: String,
) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_owned(),
            detail,
            queued_size: queue.len(),
            capacity: queue.capacity(),
        }),
    )
        .into_response()
}
