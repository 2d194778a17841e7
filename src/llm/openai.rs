//! `OpenAI` chat-completions client.

use super::{GenerateOptions, LlmProvider};
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `OpenAI` GPT client.
pub struct OpenAiClient {
    /// API base URL.
    base_url: String,
    /// Model to use.
    model: String,
    /// API key.
    api_key: String,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Creates a new client from environment variables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            client: build_client(30_000),
        }
    }

    /// Creates a client from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut client = Self::new();
        if let Some(base_url) = &config.base_url {
            client.base_url.clone_from(base_url);
        }
        if let Some(model) = &config.model {
            client.model.clone_from(model);
        }
        if let Some(api_key) = &config.api_key {
            client.api_key.clone_from(api_key);
        }
        client.client = build_client(config.timeout_ms);
        client
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(timeout_ms: u64) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to build LLM HTTP client, using defaults");
        reqwest::Client::new()
    })
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: options.stop.clone(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "request"
                };
                tracing::error!(
                    provider = "openai",
                    model = %self.model,
                    error = %e,
                    error_kind = error_kind,
                    "LLM request failed"
                );
                Error::OperationFailed {
                    operation: "openai_generate".to_string(),
                    cause: format!("{error_kind} error: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = "openai",
                model = %self.model,
                status = %status,
                "LLM API returned error status"
            );
            return Err(Error::OperationFailed {
                operation: "openai_generate".to_string(),
                cause: format!("API returned status: {status} - {body}"),
            });
        }

        let response: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(
                provider = "openai",
                model = %self.model,
                error = %e,
                "Failed to parse LLM response"
            );
            Error::OperationFailed {
                operation: "openai_response".to_string(),
                cause: e.to_string(),
            }
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::OperationFailed {
                operation: "openai_response".to_string(),
                cause: "response contained no choices".to_string(),
            })
    }
}
