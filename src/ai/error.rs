use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The endpoint could not be reached or the exchange was cut short.
    /// The reqwest error stays the source so the cause chain survives.
    #[error("failed to reach analysis service")]
    Transport(#[from] reqwest::Error),
    /// Non-2xx reply. `payload` is the remote body as sent.
    #[error("OpenRouter API error ({status}): {payload}")]
    Remote { status: u16, payload: Value },
    #[error("malformed analysis response: {0}")]
    Malformed(String),
}

impl AnalysisError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        AnalysisError::Malformed(reason.into())
    }
}
