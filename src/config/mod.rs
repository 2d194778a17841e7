//! Configuration management.
//!
//! The engine is configured from a TOML file plus environment overrides.
//! String values support `${VAR}` environment references, so secrets like API
//! keys and connection strings stay out of the document.

use crate::{Error, Result};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Expands `${VAR_NAME}` environment references in a string.
///
/// Unset variables keep their reference intact (`${MISSING_VAR}` stays
/// as-is), so a missing secret fails loudly downstream instead of silently
/// becoming an empty string. Returns `Cow::Borrowed` when the input contains
/// no references at all.
#[must_use]
pub fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let reference = &rest[open + 2..];
        let Some(close) = reference.find('}') else {
            // Unterminated reference; keep the tail verbatim.
            expanded.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = &reference[..close];
        match std::env::var(name) {
            Ok(value) => expanded.push_str(&value),
            Err(_) => {
                expanded.push_str("${");
                expanded.push_str(name);
                expanded.push('}');
            },
        }
        rest = &reference[close + 1..];
    }

    expanded.push_str(rest);
    Cow::Owned(expanded)
}

/// Engine-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Minimum similarity for a candidate to be considered.
    pub confidence_threshold: f32,
    /// K for vector search.
    pub max_templates: usize,
    /// Refuse to execute templates whose `approved` flag is false.
    pub require_approved: bool,
    /// Run vector-store reconciliation on startup.
    pub reload_templates_on_start: bool,
    /// Rebuild the vector store from scratch on startup.
    pub force_reload_templates: bool,
    /// Fail startup when a capability is unavailable; when false the engine
    /// degrades to an empty library with a warning.
    pub strict_startup: bool,
    /// Path to the domain configuration document.
    pub domain_config_path: PathBuf,
    /// Paths to template library documents.
    pub template_library_path: Vec<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            max_templates: 5,
            require_approved: false,
            reload_templates_on_start: true,
            force_reload_templates: false,
            strict_startup: true,
            domain_config_path: PathBuf::from("config/domain.yaml"),
            template_library_path: vec![PathBuf::from("config/templates.yaml")],
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider name: "ollama" or "hash".
    pub provider: String,
    /// Provider endpoint.
    pub endpoint: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            endpoint: None,
            model: None,
            dimensions: 768,
            timeout_ms: 10_000,
        }
    }
}

/// Vector store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Provider name: "memory" or "qdrant".
    pub provider: String,
    /// Collection holding the template records.
    pub collection: String,
    /// Store URL (Qdrant).
    pub url: Option<String>,
    /// Optional API key (can be `${VAR}`).
    pub api_key: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            collection: "intent_templates".to_string(),
            url: None,
            api_key: None,
            timeout_ms: 5_000,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "ollama" or "openai".
    pub provider: String,
    /// Model name.
    pub model: Option<String>,
    /// API key (can be an environment reference like `${OPENAI_API_KEY}`).
    pub api_key: Option<String>,
    /// Base URL for the provider (for self-hosted).
    pub base_url: Option<String>,
    /// Sampling temperature; extraction wants 0.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            api_key: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: 512,
            timeout_ms: 30_000,
        }
    }
}

/// Datasource configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasourceConfig {
    /// Datasource kind: "sql", "graphql", or "http".
    pub kind: String,
    /// Connection string (SQL) or endpoint URL (GraphQL/HTTP).
    pub url: String,
    /// Static headers sent on every request (GraphQL/HTTP), including
    /// authentication headers. Values can be `${VAR}` references.
    pub headers: std::collections::BTreeMap<String, String>,
    /// Maximum pool connections (SQL).
    pub max_connections: u32,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            kind: "sql".to_string(),
            url: String::new(),
            headers: std::collections::BTreeMap::new(),
            max_connections: 5,
            timeout_ms: 15_000,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log format ("json" or "pretty").
    pub format: String,
    /// Log level (e.g. "info").
    pub level: String,
    /// Full filter override (e.g. "orbit_intent=debug,hyper=info").
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
            level: "info".to_string(),
            filter: None,
        }
    }
}

/// Main configuration for the retrieval engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine-level settings.
    pub engine: EngineSettings,
    /// Embedding provider.
    pub embedding: EmbeddingConfig,
    /// Vector store.
    pub vector_store: VectorStoreConfig,
    /// LLM provider.
    pub llm: LlmConfig,
    /// Datasource.
    pub datasource: DatasourceConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads configuration from a TOML file, expanding `${VAR}` references
    /// and applying `ORBIT_INTENT_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "load_config".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let expanded = expand_env_vars(&content);
        let config: Self = toml::from_str(&expanded).map_err(|e| Error::OperationFailed {
            operation: "parse_config".to_string(),
            cause: e.to_string(),
        })?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(threshold) = env_parse::<f32>("ORBIT_INTENT_CONFIDENCE_THRESHOLD") {
            self.engine.confidence_threshold = threshold;
        }
        if let Some(max_templates) = env_parse::<usize>("ORBIT_INTENT_MAX_TEMPLATES") {
            self.engine.max_templates = max_templates;
        }
        if let Ok(provider) = std::env::var("ORBIT_INTENT_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(provider) = std::env::var("ORBIT_INTENT_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("ORBIT_INTENT_DATASOURCE_URL") {
            self.datasource.url = url;
        }
        if let Ok(level) = std::env::var("ORBIT_INTENT_LOG_LEVEL") {
            self.logging.level = level;
        }
        self
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.engine.confidence_threshold) {
            return Err(Error::InvalidInput(format!(
                "confidence_threshold must be within 0..1, got {}",
                self.engine.confidence_threshold
            )));
        }
        if self.engine.max_templates == 0 {
            return Err(Error::InvalidInput(
                "max_templates must be at least 1".to_string(),
            ));
        }
        if self.engine.template_library_path.is_empty() {
            return Err(Error::InvalidInput(
                "template_library_path must name at least one document".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}
