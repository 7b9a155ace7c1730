use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::OpenRouterConfig;

use super::{
    inference::{ChatCompletionRequest, ChatCompletionResponse},
    AnalysisError,
};

/// One chat-completions round trip.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AnalysisError>;
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: Client,
    endpoint: String,
    config: OpenRouterConfig,
}

impl OpenRouterClient {
    pub fn new(http: Client, config: OpenRouterConfig) -> Self {
        let endpoint = format!("{}/chat/completions", config.base_url);
        Self {
            http,
            endpoint,
            config,
        }
    }
}

#[async_trait]
impl ChatTransport for OpenRouterClient {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AnalysisError> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(request);
        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            let payload = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
            tracing::warn!(
                target: "analysis",
                status = status.as_u16(),
                model = %request.model,
                "remote service returned an error"
            );
            return Err(AnalysisError::Remote {
                status: status.as_u16(),
                payload,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<ChatCompletionResponse>(&body)
            .map_err(|err| AnalysisError::malformed(format!("invalid response body: {err}")))
    }
}
