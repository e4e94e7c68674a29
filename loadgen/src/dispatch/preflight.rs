use std::time::Duration;

use rama::{
    error::{BoxError, ErrorContext as _},
    http::Uri,
    telemetry::tracing,
};
use tokio::net::TcpStream;

/// Opens (and drops) one TCP connection to the target authority.
///
/// Fails fast on a target that is not listening,
/// before any worker is started.
pub async fn check_target_reachable(target: &Uri, timeout: Duration) -> Result<(), BoxError> {
    let (host, port) = target_host_port(target)?;

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| BoxError::from(format!("connect to {host}:{port} timed out after {timeout:?}")))?
        .context("connect to target")
        .context_field("host", host.clone())
        .context_field("port", port)?;

    tracing::debug!(
        %host,
        port,
        peer = ?stream.peer_addr().ok(),
        "target reachable"
    );
    Ok(())
}

fn target_host_port(target: &Uri) -> Result<(String, u16), BoxError> {
    let host = target
        .host()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| BoxError::from("target url has no host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();

    let port = target.port_u16().unwrap_or(match target.scheme_str() {
        Some("https") => 443,
        _ => 80,
    });

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_follow_scheme() {
        let uri: Uri = "http://localhost/events".parse().unwrap();
        assert_eq!(target_host_port(&uri).unwrap(), ("localhost".to_owned(), 80));

        let uri: Uri = "https://example.com/events".parse().unwrap();
        assert_eq!(target_host_port(&uri).unwrap(), ("example.com".to_owned(), 443));

        let uri: Uri = "http://[::1]:8000/events".parse().unwrap();
        assert_eq!(target_host_port(&uri).unwrap(), ("::1".to_owned(), 8000));
    }

    #[tokio::test]
    async fn listening_target_is_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let uri: Uri = format!("http://{addr}/events").parse().unwrap();
        check_target_reachable(&uri, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let uri: Uri = format!("http://{addr}/events").parse().unwrap();
        assert!(
            check_target_reachable(&uri, Duration::from_secs(2))
                .await
                .is_err()
        );
    }
}
