use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::warn;

use crate::domain::DomainError;

/// Connect timeout for every outbound request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client shared by the network adapters.
pub fn build_client() -> Result<Client, DomainError> {
    Client::builder()
        .use_rustls_tls()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(format!("HopeVoice/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DomainError::Network(format!("Failed to create HTTP client: {}", e)))
}

/// Error body returned by the services (`{"error": "..."}`).
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Turn a non-2xx response into a description carrying the service's message.
pub async fn describe_failure(response: Response, url: &str) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let detail = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect());

    warn!(status = %status, url = url, detail = %detail, "Request rejected");

    if detail.is_empty() {
        format!("HTTP {} for {}", status, url)
    } else {
        format!("HTTP {} for {}: {}", status, url, detail)
    }
}

/// Whether a failed attempt is worth repeating with the same payload.
pub fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.status().is_some_and(|s| s.is_server_error())
}
