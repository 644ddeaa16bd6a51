use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::adapters::http::{build_client, describe_failure};
use crate::domain::{AuthToken, DomainError};
use crate::ports::TokenSource;

/// Body of the token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    region: String,
}

/// Fetches speech credentials with `GET {token_url}`.
pub struct HttpTokenSource {
    client: Client,
    url: String,
}

impl HttpTokenSource {
    pub fn new(url: impl Into<String>) -> Result<Self, DomainError> {
        Ok(Self::with_client(build_client()?, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self, issued_at: Instant) -> Result<AuthToken, DomainError> {
        debug!(url = %self.url, "Fetching speech token");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DomainError::TokenUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::TokenUnavailable(
                describe_failure(response, &self.url).await,
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| DomainError::TokenUnavailable(format!("Malformed token response: {}", e)))?;

        if body.token.is_empty() || body.region.is_empty() {
            return Err(DomainError::TokenUnavailable(
                "Token response is missing token or region".to_string(),
            ));
        }

        Ok(AuthToken::new(body.token, body.region, issued_at))
    }
}
