//! # Orbit Intent
//!
//! Intent-driven template retrieval engine.
//!
//! Given a natural-language query, the engine selects a parameterized query
//! template from a library via semantic search, extracts structured parameters
//! from the query with an LLM, executes the instantiated template against an
//! external datasource (SQL, GraphQL, or HTTP), and formats the results into
//! retrieval context for the surrounding server.
//!
//! ## Architecture
//!
//! - Declarative domain and template documents (YAML) loaded at startup
//! - One embedding per template, reconciled into an external vector store
//! - Per-request pipeline: match → extract → execute → format
//! - Pluggable capabilities (`Embedder`, `VectorStore`, `LlmProvider`,
//!   `Datasource`) selected by configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use orbit_intent::services::RetrievalEngine;
//! use orbit_intent::models::RetrieveOptions;
//!
//! let engine = RetrievalEngine::from_config(config)?;
//! engine.initialize().await?;
//! let items = engine
//!     .retrieve_context("Show me customer 456", &RetrieveOptions::default())
//!     .await;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod datasource;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod store;

// Re-exports for convenience
pub use config::EngineConfig;
pub use datasource::Datasource;
pub use embedding::Embedder;
pub use llm::LlmProvider;
pub use models::{
    CandidateMatch, DomainConfig, ExecutionResult, ExtractedParameters, RetrievalContextItem,
    RetrieveOptions, Template,
};
pub use services::{RetrievalEngine, TemplateLibrary};
pub use store::VectorStore;

/// Error type for engine operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed documents, unknown fields, bad configuration values |
/// | `OperationFailed` | I/O errors, document parse failures, pool construction failures |
/// | `NoMatchingTemplate` | No candidate template scored above the confidence threshold |
/// | `ExtractionFailed` | LLM unreachable, unparseable output, or required parameter missing |
/// | `RenderingFailed` | Unbound required placeholder or malformed conditional block |
/// | `DatasourceError` | The datasource raised an error during execution |
/// | `DatasourceTimeout` | Execution exceeded the configured bound |
/// | `EmbedderUnavailable` | The embedding capability failed at startup or request time |
/// | `VectorStoreUnavailable` | The vector store capability failed at startup or request time |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A domain or template document is missing required fields
    /// - Configuration values are out of range (e.g., threshold outside 0..1)
    /// - A query string is empty
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Document files cannot be read or parsed
    /// - A capability factory is given an unknown provider name
    /// - Pool or client construction fails
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// No candidate template scored above the confidence threshold.
    #[error(
        "no matching template (best similarity {best_similarity:.3}, threshold {threshold:.3})"
    )]
    NoMatchingTemplate {
        /// The highest similarity observed among candidates.
        best_similarity: f32,
        /// The configured confidence threshold.
        threshold: f32,
    },

    /// Parameter extraction failed for every candidate template.
    ///
    /// Raised when:
    /// - The LLM is unreachable or times out
    /// - The LLM output contains no parseable JSON object
    /// - A required parameter remains unset after defaults are applied
    /// - An extracted value is not a member of the parameter's enum set
    #[error("parameter extraction failed: {0}")]
    ExtractionFailed(String),

    /// Template rendering failed.
    ///
    /// Raised when:
    /// - A required placeholder is unbound after conditional rendering
    /// - Conditional blocks are malformed at execution time
    /// - An unapproved template is executed in approved-only mode
    ///
    /// Treated as a library bug for the template in question: the engine logs a
    /// validation error and falls back to the next candidate.
    #[error("template '{template_id}' rendering failed: {cause}")]
    RenderingFailed {
        /// The template that failed to render.
        template_id: String,
        /// The underlying cause.
        cause: String,
    },

    /// The datasource raised an error during execution.
    ///
    /// Does not trigger candidate fallback; surfaces to the caller with the
    /// template identity.
    #[error("datasource error for template '{template_id}': {cause}")]
    DatasourceError {
        /// The template whose execution failed.
        template_id: String,
        /// The underlying cause.
        cause: String,
    },

    /// Datasource execution exceeded the configured bound.
    #[error("datasource timeout for template '{template_id}' after {timeout_ms}ms")]
    DatasourceTimeout {
        /// The template whose execution timed out.
        template_id: String,
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The embedding capability is unavailable.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// The vector store capability is unavailable.
    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),
}

impl Error {
    /// Returns the stable error kind string used in context-item metadata.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationFailed { .. } => "operation_failed",
            Self::NoMatchingTemplate { .. } => "no_matching_template",
            Self::ExtractionFailed(_) => "parameter_extraction_failed",
            Self::RenderingFailed { .. } => "template_rendering_failed",
            Self::DatasourceError { .. } => "datasource_error",
            Self::DatasourceTimeout { .. } => "datasource_timeout",
            Self::EmbedderUnavailable(_) => "embedder_unavailable",
            Self::VectorStoreUnavailable(_) => "vector_store_unavailable",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("empty query".to_string());
        assert_eq!(err.to_string(), "invalid input: empty query");

        let err = Error::OperationFailed {
            operation: "load_templates".to_string(),
            cause: "file not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 'load_templates' failed: file not found"
        );

        let err = Error::RenderingFailed {
            template_id: "find_customer".to_string(),
            cause: "unbound placeholder :customer_id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "template 'find_customer' rendering failed: unbound placeholder :customer_id"
        );
    }

    #[test]
    fn test_error_kind_strings() {
        let err = Error::NoMatchingTemplate {
            best_similarity: 0.4,
            threshold: 0.75,
        };
        assert_eq!(err.kind(), "no_matching_template");

        let err = Error::ExtractionFailed("llm timeout".to_string());
        assert_eq!(err.kind(), "parameter_extraction_failed");

        let err = Error::DatasourceTimeout {
            template_id: "recent_orders".to_string(),
            timeout_ms: 15_000,
        };
        assert_eq!(err.kind(), "datasource_timeout");
    }
}
