//! Ollama embedding client.

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama embedding client.
pub struct OllamaEmbedder {
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Declared embedding dimensionality.
    dimensions: usize,
    /// HTTP client.
    client: reqwest::Client,
}

impl OllamaEmbedder {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "nomic-embed-text";

    /// Creates an embedder from configuration.
    #[must_use]
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string());
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        Self {
            endpoint,
            model,
            dimensions: config.dimensions,
            client: build_client(config.timeout_ms),
        }
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

fn build_client(timeout_ms: u64) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to build embedding HTTP client, using defaults");
        reqwest::Client::new()
    })
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    provider = "ollama",
                    model = %self.model,
                    error = %e,
                    is_timeout = e.is_timeout(),
                    is_connect = e.is_connect(),
                    "Embedding request failed"
                );
                Error::EmbedderUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = "ollama",
                model = %self.model,
                status = %status,
                "Embedding API returned error status"
            );
            return Err(Error::EmbedderUnavailable(format!(
                "API returned status: {status} - {body}"
            )));
        }

        let response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbedderUnavailable(format!("invalid response body: {e}")))?;

        if response.embedding.is_empty() {
            return Err(Error::EmbedderUnavailable(
                "empty embedding returned".to_string(),
            ));
        }

        Ok(response.embedding)
    }
}
