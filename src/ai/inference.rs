use serde::{Deserialize, Serialize};

use crate::domain::{Accuracy, PageSelectionRequest};

use super::AnalysisError;

const EXPLANATION_SYSTEM_PROMPT: &str = r#"You are a fact-checking extension which attempts to give correct answers as much as possible and interprets things literally. You feel very comfortable responding with "Somewhere in between" or "I don't know" if you are not sure. You only respond with "Almost certainly true" or "Almost certainly false" if you are very sure."#;

const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"You map a fact-checking answer onto a fixed verdict. Reply with a JSON object of the form {"object": "<phrase>"} where <phrase> is exactly one of the allowed phrases, copied verbatim."#;

pub fn build_explanation_request(model: &str, page: &PageSelectionRequest) -> ChatCompletionRequest {
    let prompt = format!(
        "Is the following statement true or false? Please respond with one of the allowed phrases and then explain why.\n\n\
         Source URL: {}\n\
         Page Title: {}\n\
         Statement to verify: {}",
        page.url, page.title, page.text
    );
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(EXPLANATION_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ],
        temperature: 0.0,
        response_format: None,
    }
}

pub fn build_classification_request(model: &str, explanation: &str) -> ChatCompletionRequest {
    let phrases = Accuracy::ALL
        .iter()
        .map(|accuracy| format!("- {}", accuracy.label()))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Choose one of the following phrases:\n{phrases}\n\nBased on the following response:\n{explanation}"
    );
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(CLASSIFICATION_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ],
        temperature: 0.0,
        response_format: Some(ResponseFormat {
            r#type: "json_object".into(),
        }),
    }
}

/// Free-text answer and citations from the explanation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    pub content: String,
    pub citations: Vec<String>,
}

pub fn parse_explanation(response: ChatCompletionResponse) -> Result<Explanation, AnalysisError> {
    let content = first_content(response.choices)?;
    Ok(Explanation {
        content,
        citations: response.citations.unwrap_or_default(),
    })
}

pub fn parse_classification(response: ChatCompletionResponse) -> Result<Accuracy, AnalysisError> {
    let content = first_content(response.choices)?;
    let payload: ClassificationPayload = serde_json::from_str(content.trim()).map_err(|err| {
        AnalysisError::malformed(format!("classification is not a JSON object: {err}"))
    })?;
    payload.object.parse::<Accuracy>().map_err(|err| {
        AnalysisError::malformed(format!("classification outside the allowed set: {err}"))
    })
}

fn first_content(choices: Vec<ChatChoice>) -> Result<String, AnalysisError> {
    let choice = choices
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::malformed("response did not contain any choices"))?;
    choice
        .message
        .and_then(|msg| msg.content)
        .ok_or_else(|| AnalysisError::malformed("response missing message content"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub citations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ChatCompletionMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    object: String,
}
