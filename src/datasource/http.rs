//! HTTP datasource.

use super::{Datasource, RenderedRequest};
use crate::config::DatasourceConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP datasource issuing requests against a REST-style API.
///
/// Authentication headers come from the datasource configuration; template
/// statics and header-located parameters are merged in per request, with the
/// request-level values winning on conflict.
pub struct HttpDatasource {
    base_url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl HttpDatasource {
    /// Creates a datasource from configuration.
    #[must_use]
    pub fn from_config(config: &DatasourceConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }
        let client = builder.build().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to build HTTP datasource client, using defaults");
            reqwest::Client::new()
        });

        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            headers: config.headers.clone(),
            client,
        }
    }
}

#[async_trait]
impl Datasource for HttpDatasource {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, request: &RenderedRequest) -> Result<Vec<serde_json::Value>> {
        let RenderedRequest::Http {
            method,
            path,
            query,
            headers,
            body,
        } = request
        else {
            return Err(Error::OperationFailed {
                operation: "http_execute".to_string(),
                cause: "request is not an HTTP request".to_string(),
            });
        };

        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
            Error::OperationFailed {
                operation: "http_execute".to_string(),
                cause: format!("invalid method '{method}'"),
            }
        })?;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut http_request = self.client.request(method, &url);
        if !query.is_empty() {
            http_request = http_request.query(query);
        }
        for (name, value) in &self.headers {
            http_request = http_request.header(name, value);
        }
        for (name, value) in headers {
            http_request = http_request.header(name, value);
        }
        if let Some(body) = body {
            http_request = http_request.json(body);
        }

        let response = http_request.send().await.map_err(|e| {
            tracing::error!(
                datasource = "http",
                url = %url,
                error = %e,
                "HTTP request failed"
            );
            Error::OperationFailed {
                operation: "http_execute".to_string(),
                cause: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OperationFailed {
                operation: "http_execute".to_string(),
                cause: format!("status {status} - {body}"),
            });
        }

        let text = response.text().await.map_err(|e| Error::OperationFailed {
            operation: "http_execute".to_string(),
            cause: format!("failed to read response body: {e}"),
        })?;

        // Non-JSON responses are carried as a single string document.
        let document = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text));
        Ok(vec![document])
    }
}
