//! GraphQL datasource.

use super::{Datasource, RenderedRequest};
use crate::config::DatasourceConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// GraphQL datasource posting operations to a single endpoint.
pub struct GraphqlDatasource {
    endpoint: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl GraphqlDatasource {
    /// Creates a datasource from configuration.
    #[must_use]
    pub fn from_config(config: &DatasourceConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }
        let client = builder.build().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to build GraphQL HTTP client, using defaults");
            reqwest::Client::new()
        });

        Self {
            endpoint: config.url.clone(),
            headers: config.headers.clone(),
            client,
        }
    }
}

#[async_trait]
impl Datasource for GraphqlDatasource {
    fn kind(&self) -> &'static str {
        "graphql"
    }

    async fn execute(&self, request: &RenderedRequest) -> Result<Vec<serde_json::Value>> {
        let RenderedRequest::Graphql {
            document,
            variables,
        } = request
        else {
            return Err(Error::OperationFailed {
                operation: "graphql_execute".to_string(),
                cause: "request is not a GraphQL request".to_string(),
            });
        };

        let mut http_request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": document, "variables": variables }));
        for (name, value) in &self.headers {
            http_request = http_request.header(name, value);
        }

        let response = http_request.send().await.map_err(|e| {
            tracing::error!(
                datasource = "graphql",
                endpoint = %self.endpoint,
                error = %e,
                "GraphQL request failed"
            );
            Error::OperationFailed {
                operation: "graphql_execute".to_string(),
                cause: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OperationFailed {
                operation: "graphql_execute".to_string(),
                cause: format!("status {status} - {body}"),
            });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| Error::OperationFailed {
                operation: "graphql_execute".to_string(),
                cause: format!("invalid response body: {e}"),
            })?;

        if let Some(errors) = body.get("errors").and_then(serde_json::Value::as_array)
            && !errors.is_empty()
        {
            let first = errors[0]
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown GraphQL error");
            return Err(Error::OperationFailed {
                operation: "graphql_execute".to_string(),
                cause: first.to_string(),
            });
        }

        let data = body
            .get("data")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        // One response document; the formatter walks items_path into it.
        Ok(vec![data])
    }
}
