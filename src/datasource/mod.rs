//! Datasource execution.
//!
//! The engine renders a template into a [`RenderedRequest`] and hands it to a
//! datasource for execution. Datasources own their connections and pools; the
//! engine holds one handle and treats it as thread-safe.
//!
//! Row convention: SQL datasources return one JSON object per row. GraphQL and
//! HTTP datasources return a single-element vector holding the response
//! document; the result formatter locates the record list inside it via the
//! template's `response_mapping.items_path`.

mod graphql;
mod http;
mod sql;

pub use graphql::GraphqlDatasource;
pub use http::HttpDatasource;
pub use sql::{BindStyle, SqlDatasource, rewrite_sql_placeholders};

use crate::config::DatasourceConfig;
use crate::models::{DataType, HttpLocation};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A parameter value bound for execution, typed by its declaration.
#[derive(Debug, Clone)]
pub struct BoundParam {
    /// Parameter name.
    pub name: String,
    /// Declared data type, used to pick the host-parameter bind type.
    pub data_type: DataType,
    /// The extracted value.
    pub value: serde_json::Value,
    /// Request location for HTTP templates.
    pub location: HttpLocation,
}

/// A fully rendered, executable request.
#[derive(Debug, Clone)]
pub enum RenderedRequest {
    /// SQL text with named `:name` placeholders and its bind list.
    ///
    /// Parameters are always bound as host parameters; the datasource rewrites
    /// the named placeholders into its positional style.
    Sql {
        /// SQL text after conditional rendering.
        sql: String,
        /// Bind values in declaration order.
        params: Vec<BoundParam>,
    },
    /// GraphQL operation plus a variables map.
    Graphql {
        /// The GraphQL document.
        document: String,
        /// Variable name → value.
        variables: serde_json::Map<String, serde_json::Value>,
    },
    /// HTTP request with parameters already routed by location.
    Http {
        /// Uppercase HTTP method.
        method: String,
        /// Path with placeholders substituted.
        path: String,
        /// Query string pairs.
        query: Vec<(String, String)>,
        /// Header name → value (template statics plus header parameters).
        headers: BTreeMap<String, String>,
        /// JSON body, if any.
        body: Option<serde_json::Value>,
    },
}

/// Trait for datasource executors.
#[async_trait]
pub trait Datasource: Send + Sync {
    /// The datasource kind (`sql`, `graphql`, or `http`).
    fn kind(&self) -> &'static str;

    /// Executes a rendered request and returns its records.
    ///
    /// # Errors
    ///
    /// Returns an error when execution fails at the datasource.
    async fn execute(&self, request: &RenderedRequest) -> Result<Vec<serde_json::Value>>;
}

/// Builds the configured datasource.
///
/// # Errors
///
/// Returns an error for an unknown kind or an unusable connection string.
pub fn from_config(config: &DatasourceConfig) -> Result<Arc<dyn Datasource>> {
    match config.kind.as_str() {
        "sql" => Ok(Arc::new(SqlDatasource::from_config(config)?)),
        "graphql" => Ok(Arc::new(GraphqlDatasource::from_config(config))),
        "http" => Ok(Arc::new(HttpDatasource::from_config(config))),
        other => Err(Error::OperationFailed {
            operation: "build_datasource".to_string(),
            cause: format!("unknown datasource kind '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let config = DatasourceConfig {
            kind: "fax".to_string(),
            ..DatasourceConfig::default()
        };
        assert!(from_config(&config).is_err());
    }
}
