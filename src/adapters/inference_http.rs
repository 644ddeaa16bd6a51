use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::adapters::http::{build_client, describe_failure, is_retryable};
use crate::domain::config::InferenceConfig;
use crate::domain::{AudioPayload, DomainError, InferenceResult};
use crate::ports::InferenceClient;

/// Body of a successful `process_audio` response.
#[derive(Deserialize)]
struct ProcessAudioResponse {
    transcription: String,
    response: String,
}

/// Body of the `/health` probe.
#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

/// Outcome of a single attempt.
enum Attempt {
    Done(InferenceResult),
    Retry(String),
}

/// Inference client posting multipart audio to the remote service.
pub struct HttpInferenceClient {
    client: Client,
    url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, DomainError> {
        Ok(Self::with_client(build_client()?, config))
    }

    pub fn with_client(client: Client, config: &InferenceConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Probe `GET /health` on the service host.
    pub async fn health(&self) -> Result<(), DomainError> {
        let health_url = Url::parse(&self.url)
            .and_then(|u| u.join("/health"))
            .map_err(|e| DomainError::Config(format!("Invalid inference URL: {}", e)))?;

        let response = self
            .client
            .get(health_url.as_str())
            .send()
            .await
            .map_err(|e| DomainError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::Network(
                describe_failure(response, health_url.as_str()).await,
            ));
        }

        let body: HealthResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Network(format!("Malformed health response: {}", e)))?;

        if body.status == "ok" {
            Ok(())
        } else {
            Err(DomainError::Network(format!(
                "Inference service unhealthy: {}",
                body.status
            )))
        }
    }

    fn build_form(payload: &AudioPayload, user_id: &str, session_id: &str) -> Result<Form, DomainError> {
        let file = Part::bytes(payload.bytes().to_vec())
            .file_name("recording.wav")
            .mime_str(AudioPayload::CONTENT_TYPE)
            .map_err(|e| DomainError::Network(e.to_string()))?;

        Ok(Form::new()
            .part("file", file)
            .text("user_id", user_id.to_string())
            .text("session_id", session_id.to_string()))
    }

    async fn attempt(
        &self,
        payload: &AudioPayload,
        user_id: &str,
        session_id: &str,
    ) -> Result<Attempt, DomainError> {
        let form = Self::build_form(payload, user_id, session_id)?;

        let response = match self.client.post(&self.url).multipart(form).send().await {
            Ok(r) => r,
            Err(e) if is_retryable(&e) => return Ok(Attempt::Retry(e.to_string())),
            Err(e) => return Err(DomainError::Network(e.to_string())),
        };

        let status = response.status();
        debug!(status = %status, "Inference response received");

        if !status.is_success() {
            let message = describe_failure(response, &self.url).await;
            return if status.is_server_error() {
                Ok(Attempt::Retry(message))
            } else {
                Err(DomainError::Network(message))
            };
        }

        let body: ProcessAudioResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Network(format!("Malformed inference response: {}", e)))?;

        Ok(Attempt::Done(InferenceResult::new(body.transcription, body.response)))
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(
        &self,
        payload: &AudioPayload,
        user_id: &str,
        session_id: &str,
    ) -> Result<InferenceResult, DomainError> {
        if user_id.trim().is_empty() || session_id.trim().is_empty() {
            return Err(DomainError::Config(
                "user_id and session_id are required".to_string(),
            ));
        }

        info!(
            bytes = payload.len(),
            duration_secs = payload.duration_secs(),
            user_id = user_id,
            session_id = session_id,
            "Submitting audio for inference"
        );

        let mut backoff = self.retry_backoff;
        let mut attempt = 0;
        loop {
            match self.attempt(payload, user_id, session_id).await? {
                Attempt::Done(result) => {
                    info!(
                        transcription_len = result.transcription.len(),
                        response_len = result.response_text.len(),
                        "Inference complete"
                    );
                    return Ok(result);
                }
                Attempt::Retry(message) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries = self.max_retries, error = %message, "Retrying inference");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Attempt::Retry(message) => return Err(DomainError::Network(message)),
            }
        }
    }
}
