//! Ollama (local) client.

use super::{GenerateOptions, LlmProvider};
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama local LLM client.
pub struct OllamaClient {
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::Client,
}

impl OllamaClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a new Ollama client from environment variables.
    #[must_use]
    pub fn new() -> Self {
        let endpoint =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        Self {
            endpoint,
            model,
            client: build_client(30_000),
        }
    }

    /// Creates a client from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut client = Self::new();
        if let Some(base_url) = &config.base_url {
            client.endpoint.clone_from(base_url);
        }
        if let Some(model) = &config.model {
            client.model.clone_from(model);
        }
        client.client = build_client(config.timeout_ms);
        client
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for OllamaClient {
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
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl LlmProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
                stop: options.stop.clone(),
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
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
                    provider = "ollama",
                    model = %self.model,
                    error = %e,
                    error_kind = error_kind,
                    "LLM request failed"
                );
                Error::OperationFailed {
                    operation: "ollama_generate".to_string(),
                    cause: format!("{error_kind} error: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = "ollama",
                model = %self.model,
                status = %status,
                body = %body,
                "LLM API returned error status"
            );
            return Err(Error::OperationFailed {
                operation: "ollama_generate".to_string(),
                cause: format!("API returned status: {status} - {body}"),
            });
        }

        let response: GenerateResponse = response.json().await.map_err(|e| {
            tracing::error!(
                provider = "ollama",
                model = %self.model,
                error = %e,
                "Failed to parse LLM response"
            );
            Error::OperationFailed {
                operation: "ollama_response".to_string(),
                cause: e.to_string(),
            }
        })?;

        Ok(response.response)
    }
}
