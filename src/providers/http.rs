//! HTTP plumbing shared by the provider clients: client construction and
//! mapping of transport errors and status codes onto [`ProviderError`].

use super::ProviderError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("verdant-core/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in an `InvalidResponse` message
const MAX_ERROR_BODY: usize = 256;

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .build()
        .map_err(|e| ProviderError::Unreachable(format!("failed to build HTTP client: {e}")))
}

/// Map a `reqwest` transport error
pub fn classify_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else if error.is_decode() || error.is_body() {
        ProviderError::InvalidResponse(error.to_string())
    } else {
        ProviderError::Unreachable(error.to_string())
    }
}

/// Map a non-success status. 429 is a rate limit, 5xx means the service is
/// down, anything else is treated as a contract violation.
pub async fn classify_status(response: Response) -> ProviderError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return ProviderError::RateLimited { retry_after };
    }

    if status.is_server_error() {
        return ProviderError::Unreachable(format!("server error {status}"));
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    ProviderError::InvalidResponse(format!("unexpected status {status}: {body}"))
}

/// Decode a JSON body, classifying failures as invalid responses
pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let bytes = response.bytes().await.map_err(classify_transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_server::serve_once;

    async fn fetch(status: u16, headers: &[(&str, &str)], body: &str) -> Response {
        let base_url = serve_once(status, headers, body).await;
        build_client(Duration::from_secs(5))
            .unwrap()
            .get(format!("{base_url}/probe"))
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let response = fetch(429, &[("Retry-After", "12")], "").await;
        assert_eq!(
            classify_status(response).await,
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let response = fetch(503, &[], "maintenance").await;
        assert!(matches!(
            classify_status(response).await,
            ProviderError::Unreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_client_error_is_invalid_response() {
        let response = fetch(400, &[], r#"{"error":"bad image"}"#).await;
        match classify_status(response).await {
            ProviderError::InvalidResponse(message) => assert!(message.contains("bad image")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_response() {
        let response = fetch(200, &[("Content-Type", "application/json")], "{not json").await;
        let decoded: Result<serde_json::Value, _> = decode_json(response).await;
        assert!(matches!(decoded, Err(ProviderError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = build_client(Duration::from_secs(2))
            .unwrap()
            .get(format!("http://{addr}/probe"))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(
            classify_transport_error(error),
            ProviderError::Unreachable(_)
        ));
    }
}
