use rama::http::{
    Response,
    service::web::response::{IntoResponse, Json},
};

use super::{IngestState, types::HealthResponse};
use crate::utils::time::now_rfc3339_millis;

pub(super) fn health_response(state: &IngestState) -> Response {
    Json(HealthResponse {
        status: "ok".to_owned(),
        time: now_rfc3339_millis(),
        queued_size: state.queue.len(),
        capacity: state.queue.capacity(),
        consumers: state.consumers.state().to_string(),
        processed: state.consumers.processed(),
        failed: state.consumers.failed(),
    })
    .into_response()
}
