use serde::{Deserialize, Serialize};

use super::types::PageSelectionRequest;

/// Sent to a page when the user picks the fact-check menu entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentMessage {
    #[serde(rename = "FACT_CHECK_REQUEST")]
    FactCheckRequest { text: String },
}

/// Sent from a page to the background context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackgroundMessage {
    #[serde(rename = "PROCESS_FACT_CHECK")]
    ProcessFactCheck { data: PageSelectionRequest },
}

/// Reply to a `PROCESS_FACT_CHECK` message. `result` holds a JSON-encoded
/// `FactCheckResponse`; `error` is set only when no response could be produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResponse {
    pub fn result(result: String) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }
}
