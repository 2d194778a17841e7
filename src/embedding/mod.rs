//! Embedding generation.
//!
//! Provides the embedding capability used to index templates and embed
//! incoming queries. Implementations are selected by provider name at
//! configuration load.

mod hash;
mod ollama;

pub use hash::HashEmbedder;
pub use ollama::OllamaEmbedder;

use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding generators.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Builds the configured embedder.
///
/// # Errors
///
/// Returns an error for an unknown provider name.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::from_config(config))),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        other => Err(Error::OperationFailed {
            operation: "build_embedder".to_string(),
            cause: format!("unknown embedding provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_factory_builds_hash_embedder() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        #[allow(clippy::unwrap_used)]
        let embedder = from_config(&config).unwrap();
        assert_eq!(embedder.dimensions(), 64);
        assert_eq!(embedder.name(), "hash");
    }
}
