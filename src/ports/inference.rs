use async_trait::async_trait;

use crate::domain::{AudioPayload, DomainError, InferenceResult};

/// Port for the remote transcription + response service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Submit captured audio and return the transcription and response.
    ///
    /// Any connectivity failure, non-2xx status or malformed body is a
    /// `Network` error. Dropping the returned future abandons the request.
    async fn infer(
        &self,
        payload: &AudioPayload,
        user_id: &str,
        session_id: &str,
    ) -> Result<InferenceResult, DomainError>;
}
