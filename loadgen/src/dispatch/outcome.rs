use std::time::Duration;

use rama::{
    Service,
    error::BoxError,
    http::{BodyExtractExt as _, Request, Response, StatusCode, Uri, service::client::HttpClientExt as _},
    telemetry::tracing,
};
use serde_json::Value;

use eventpipe_ingest_lib::http::IngestResponse;

use crate::reporter::{FailureKind, RequestOutcome};

/// Sends one batch and classifies the result.
///
/// A batch of one is sent as a bare object, larger batches as an array.
pub(super) async fn send_batch<S>(
    client: &S,
    url: &Uri,
    batch: &[Value],
    timeout: Duration,
) -> RequestOutcome
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    let request = client.post(url.clone());
    let request = match batch {
        [single] => request.json(single),
        batch => request.json(&batch),
    };

    let exchange = async {
        match request.send().await {
            Ok(resp) => classify_response(resp).await,
            Err(err) => {
                tracing::debug!("transport error: {err}");
                RequestOutcome::Failed(FailureKind::Transport)
            }
        }
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::debug!(?timeout, "request timed out");
            RequestOutcome::Failed(FailureKind::Timeout)
        }
    }
}

async fn classify_response(resp: Response) -> RequestOutcome {
    let status = resp.status();

    if status.is_success() {
        return match resp.try_into_json::<IngestResponse>().await {
            Ok(body) => RequestOutcome::Accepted {
                events: body.accepted,
            },
            Err(err) => {
                tracing::debug!(%status, "unexpected success body: {err}");
                RequestOutcome::Failed(FailureKind::InvalidResponse)
            }
        };
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            RequestOutcome::Rejected {
                status: status.as_u16(),
            }
        }
        _ => RequestOutcome::Failed(FailureKind::HttpStatus(status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use rama::http::{Body, StatusCode};

    use super::*;

    fn response(status: StatusCode, body: &'static str) -> Response {
        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = status;
        resp
    }

    #[tokio::test]
    async fn success_with_ingest_body_is_accepted() {
        let outcome = classify_response(response(
            StatusCode::OK,
            r#"{"accepted":3,"queued_size":3,"timestamp":"2024-01-01T00:00:00.000Z"}"#,
        ))
        .await;
        assert_eq!(outcome, RequestOutcome::Accepted { events: 3 });
    }

    #[tokio::test]
    async fn success_with_other_body_is_invalid() {
        let outcome = classify_response(response(StatusCode::OK, "pong")).await;
        assert_eq!(outcome, RequestOutcome::Failed(FailureKind::InvalidResponse));
    }

    #[tokio::test]
    async fn backpressure_statuses_are_rejections() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::SERVICE_UNAVAILABLE] {
            let outcome = classify_response(response(status, "{}")).await;
            assert_eq!(
                outcome,
                RequestOutcome::Rejected {
                    status: status.as_u16()
                }
            );
        }
    }

    #[tokio::test]
    async fn other_statuses_are_failures() {
        let outcome = classify_response(response(StatusCode::BAD_REQUEST, "{}")).await;
        assert_eq!(outcome, RequestOutcome::Failed(FailureKind::HttpStatus(400)));

        let outcome = classify_response(response(StatusCode::INTERNAL_SERVER_ERROR, "")).await;
        assert_eq!(outcome, RequestOutcome::Failed(FailureKind::HttpStatus(500)));
    }
}
