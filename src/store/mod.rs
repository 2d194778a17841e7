//! Template vector store.
//!
//! Provides the abstraction over the external vector index holding one
//! embedding per template. The engine requires monotone distance (smaller is
//! closer) in a cosine-like space; each implementation is responsible for
//! mapping its native scoring into that convention.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Configuration |
//! |---------|----------|---------------|
//! | [`MemoryVectorStore`] | In-process index for dev and tests | Default, no external deps |
//! | [`QdrantVectorStore`] | Qdrant collection over REST | Requires a running Qdrant |

mod memory;
mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantVectorStore;

use crate::config::VectorStoreConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Metadata stored next to each template embedding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateRecordMeta {
    /// Content hash of the template at embedding time.
    pub content_hash: String,
    /// Template version at embedding time.
    pub version: Option<String>,
}

/// Trait for template vector stores.
///
/// Implementations should be thread-safe (`Send + Sync`); concurrency across
/// requests is delegated to the store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The store name.
    fn name(&self) -> &'static str;

    /// Prepares the store for a given embedding dimensionality
    /// (e.g., creates the collection when missing).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be prepared.
    async fn ensure_ready(&self, dimensions: usize) -> Result<()> {
        let _ = dimensions;
        Ok(())
    }

    /// Inserts or updates a template record.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert operation fails.
    async fn upsert(&self, id: &str, embedding: &[f32], meta: &TemplateRecordMeta) -> Result<()>;

    /// Removes a template record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal operation fails.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Searches for the `k` nearest records.
    ///
    /// Returns `(template_id, distance)` pairs ordered by ascending distance,
    /// where distance is cosine-like (`0` identical, larger is farther).
    ///
    /// # Errors
    ///
    /// Returns an error if the search operation fails.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>>;

    /// Returns all stored records keyed by template id.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan operation fails.
    async fn get_all_records(&self) -> Result<HashMap<String, TemplateRecordMeta>>;

    /// Returns the set of stored template ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan operation fails.
    async fn get_all_ids(&self) -> Result<HashSet<String>> {
        Ok(self.get_all_records().await?.into_keys().collect())
    }

    /// Removes all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the clear operation fails.
    async fn clear(&self) -> Result<()>;
}

/// Builds the configured vector store.
///
/// # Errors
///
/// Returns an error for an unknown provider name.
pub fn from_config(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(MemoryVectorStore::new())),
        "qdrant" => Ok(Arc::new(QdrantVectorStore::from_config(config))),
        other => Err(Error::OperationFailed {
            operation: "build_vector_store".to_string(),
            cause: format!("unknown vector store provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = VectorStoreConfig {
            provider: "filing-cabinet".to_string(),
            ..VectorStoreConfig::default()
        };
        assert!(from_config(&config).is_err());
    }
}
