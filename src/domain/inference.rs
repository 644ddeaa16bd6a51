use serde::{Deserialize, Serialize};

/// Structured result of one inference round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// What the user said.
    pub transcription: String,
    /// The assistant's textual answer, possibly empty.
    pub response_text: String,
}

impl InferenceResult {
    pub fn new(transcription: impl Into<String>, response_text: impl Into<String>) -> Self {
        Self {
            transcription: transcription.into(),
            response_text: response_text.into(),
        }
    }

    /// Whether there is anything to say back.
    pub fn has_response(&self) -> bool {
        !self.response_text.trim().is_empty()
    }
}
