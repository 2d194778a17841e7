//! Template rendering and execution.
//!
//! The executor instantiates a template body with its extracted parameters,
//! runs the safety checks, and dispatches to the datasource. Parameters are
//! always bound as host parameters for SQL; they are never interpolated into
//! the SQL text.

use crate::datasource::{BoundParam, Datasource, RenderedRequest};
use crate::models::{
    ExecutionResult, ExtractedParameters, HttpLocation, Template, TemplateBody,
    render_conditionals, sql_placeholder_spans,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Renders and executes templates against the configured datasource.
pub struct TemplateExecutor {
    datasource: Arc<dyn Datasource>,
    timeout: Duration,
    require_approved: bool,
}

impl TemplateExecutor {
    /// Creates an executor over the given datasource.
    #[must_use]
    pub fn new(datasource: Arc<dyn Datasource>, timeout: Duration, require_approved: bool) -> Self {
        Self {
            datasource,
            timeout,
            require_approved,
        }
    }

    /// Renders a template body with its parameters.
    ///
    /// Fails fast on unbound placeholders: every placeholder remaining after
    /// conditional rendering must have a value before dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RenderingFailed`] for unbound placeholders, malformed
    /// conditional blocks, or an unapproved template in approved-only mode.
    pub fn render(
        &self,
        template: &Template,
        params: &ExtractedParameters,
    ) -> Result<RenderedRequest> {
        if self.require_approved && !template.approved {
            return Err(Error::RenderingFailed {
                template_id: template.id.clone(),
                cause: "template is not approved for execution".to_string(),
            });
        }

        match &template.body {
            TemplateBody::Sql { sql } => render_sql(template, sql, params),
            TemplateBody::Graphql { document, .. } => Ok(render_graphql(document, params)),
            TemplateBody::Http {
                method,
                endpoint,
                headers,
                body,
            } => render_http(template, method, endpoint, headers, body.as_ref(), params),
        }
    }

    /// Renders and executes a template, recording wall-clock time and row
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RenderingFailed`] before dispatch,
    /// [`Error::DatasourceTimeout`] when execution exceeds the configured
    /// bound, and [`Error::DatasourceError`] when the datasource fails.
    pub async fn execute(
        &self,
        template: &Template,
        params: &ExtractedParameters,
    ) -> Result<ExecutionResult> {
        let request = self.render(template, params)?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.datasource.execute(&request)).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(rows)) => {
                let result = ExecutionResult::from_rows(rows, elapsed_ms);
                tracing::debug!(
                    template_id = %template.id,
                    rows = result.row_count,
                    elapsed_ms,
                    "Template executed"
                );
                Ok(result)
            },
            Ok(Err(e)) => {
                tracing::error!(
                    template_id = %template.id,
                    elapsed_ms,
                    error = %e,
                    "Datasource execution failed"
                );
                Err(Error::DatasourceError {
                    template_id: template.id.clone(),
                    cause: e.to_string(),
                })
            },
            Err(_) => {
                tracing::error!(
                    template_id = %template.id,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Datasource execution timed out"
                );
                Err(Error::DatasourceTimeout {
                    template_id: template.id.clone(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }
}

fn bound_params(template: &Template, params: &ExtractedParameters) -> Vec<BoundParam> {
    template
        .parameters
        .iter()
        .filter_map(|parameter| {
            params.values.get(&parameter.name).map(|value| BoundParam {
                name: parameter.name.clone(),
                data_type: parameter.data_type,
                value: value.clone(),
                location: parameter.location.unwrap_or_default(),
            })
        })
        .collect()
}

fn render_sql(
    template: &Template,
    sql: &str,
    params: &ExtractedParameters,
) -> Result<RenderedRequest> {
    let rendered = render_conditionals(sql, |name| params.values.contains_key(name)).map_err(
        |e| Error::RenderingFailed {
            template_id: template.id.clone(),
            cause: e.to_string(),
        },
    )?;

    // Every placeholder surviving conditional rendering must be bound.
    for (_, name) in sql_placeholder_spans(&rendered) {
        if !params.values.contains_key(&name) {
            return Err(Error::RenderingFailed {
                template_id: template.id.clone(),
                cause: format!("unbound placeholder :{name}"),
            });
        }
    }

    Ok(RenderedRequest::Sql {
        sql: rendered,
        params: bound_params(template, params),
    })
}

fn render_graphql(document: &str, params: &ExtractedParameters) -> RenderedRequest {
    let mut variables = serde_json::Map::new();
    for (name, value) in &params.values {
        variables.insert(name.clone(), value.clone());
    }
    RenderedRequest::Graphql {
        document: document.to_string(),
        variables,
    }
}

fn render_http(
    template: &Template,
    method: &str,
    endpoint: &str,
    static_headers: &BTreeMap<String, String>,
    body: Option<&serde_json::Value>,
    params: &ExtractedParameters,
) -> Result<RenderedRequest> {
    let mut path = endpoint.to_string();
    let mut query = Vec::new();
    let mut headers = static_headers.clone();
    let mut rendered_body = body.cloned();

    for parameter in &template.parameters {
        let Some(value) = params.values.get(&parameter.name) else {
            continue;
        };
        let text = value_to_string(value);
        let placeholder = format!("{{{}}}", parameter.name);

        let location = match parameter.location {
            Some(location) => location,
            None if path.contains(&placeholder) => HttpLocation::Path,
            None => HttpLocation::Query,
        };

        match location {
            HttpLocation::Path => {
                path = path.replace(&placeholder, &percent_encode(&text));
            },
            HttpLocation::Query => {
                query.push((parameter.name.clone(), text));
            },
            HttpLocation::Header => {
                headers.insert(parameter.name.clone(), text);
            },
            HttpLocation::Body => {
                let target = rendered_body.get_or_insert_with(|| serde_json::json!({}));
                if let Some(object) = target.as_object_mut() {
                    object.insert(parameter.name.clone(), value.clone());
                }
            },
        }
    }

    if let Some(body_value) = rendered_body.as_mut() {
        substitute_json_placeholders(body_value, &params.values);
    }

    // Any placeholder left in the path means a parameter went unbound.
    if let Some(open) = path.find('{')
        && path[open..].contains('}')
    {
        return Err(Error::RenderingFailed {
            template_id: template.id.clone(),
            cause: format!("unbound path placeholder in '{path}'"),
        });
    }

    Ok(RenderedRequest::Http {
        method: method.to_string(),
        path,
        query,
        headers,
        body: rendered_body,
    })
}

fn substitute_json_placeholders(
    value: &mut serde_json::Value,
    params: &std::collections::BTreeMap<String, serde_json::Value>,
) {
    match value {
        serde_json::Value::String(text) => {
            let original = text.clone();
            for (name, param_value) in params {
                if original == format!("{{{name}}}") {
                    // A string that is exactly one placeholder keeps the typed value.
                    *value = param_value.clone();
                    return;
                }
            }
            let mut replaced = original;
            for (name, param_value) in params {
                let placeholder = format!("{{{name}}}");
                if replaced.contains(&placeholder) {
                    replaced = replaced.replace(&placeholder, &value_to_string(param_value));
                }
            }
            *value = serde_json::Value::String(replaced);
        },
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_json_placeholders(item, params);
            }
        },
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute_json_placeholders(item, params);
            }
        },
        _ => {},
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Percent-encodes a path segment, keeping unreserved characters.
fn percent_encode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            },
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::models::{DataType, ExtractionStatus, RawTemplate, TemplateParameter};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockDatasource {
        rows: Vec<serde_json::Value>,
        fail_with: Option<String>,
        delay: Option<Duration>,
        seen: Mutex<Vec<RenderedRequest>>,
    }

    impl MockDatasource {
        fn returning(rows: Vec<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                rows,
                fail_with: None,
                delay: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(cause: &str) -> Arc<Self> {
            Arc::new(Self {
                rows: Vec::new(),
                fail_with: Some(cause.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                rows: Vec::new(),
                fail_with: None,
                delay: Some(delay),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Datasource for MockDatasource {
        fn kind(&self) -> &'static str {
            "sql"
        }

        async fn execute(&self, request: &RenderedRequest) -> Result<Vec<serde_json::Value>> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(cause) = &self.fail_with {
                return Err(Error::OperationFailed {
                    operation: "mock_execute".to_string(),
                    cause: cause.clone(),
                });
            }
            Ok(self.rows.clone())
        }
    }

    fn extracted(pairs: &[(&str, serde_json::Value)]) -> ExtractedParameters {
        ExtractedParameters {
            values: pairs
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
            status: ExtractionStatus::Ok,
        }
    }

    fn sql_template(id: &str, sql: &str, parameters: Vec<TemplateParameter>) -> Template {
        RawTemplate {
            id: id.to_string(),
            description: "test".to_string(),
            nl_examples: vec!["example".to_string()],
            parameters,
            sql_template: Some(sql.to_string()),
            approved: true,
            ..RawTemplate::default()
        }
        .into_template()
        .unwrap()
    }

    fn int_param(name: &str, required: bool) -> TemplateParameter {
        TemplateParameter {
            name: name.to_string(),
            data_type: DataType::Integer,
            required,
            ..TemplateParameter::default()
        }
    }

    #[tokio::test]
    async fn test_execute_sql_binds_and_times() {
        let datasource = MockDatasource::returning(vec![serde_json::json!({"id": 456})]);
        let executor = TemplateExecutor::new(datasource.clone(), Duration::from_secs(5), false);
        let template = sql_template(
            "find_customer",
            "SELECT id, name FROM customers WHERE id = :customer_id",
            vec![int_param("customer_id", true)],
        );

        let result = executor
            .execute(&template, &extracted(&[("customer_id", serde_json::json!(456))]))
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert!(result.error.is_none());

        let seen = datasource.seen.lock().unwrap();
        let RenderedRequest::Sql { sql, params } = &seen[0] else {
            panic!("expected SQL request");
        };
        assert!(sql.contains(":customer_id"));
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, serde_json::json!(456));
    }

    #[tokio::test]
    async fn test_conditional_block_removed_when_unbound() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource.clone(), Duration::from_secs(5), false);
        let template = sql_template(
            "orders",
            "SELECT * FROM orders WHERE 1=1 {% if status %} AND status = :status {% endif %}",
            vec![TemplateParameter {
                name: "status".to_string(),
                data_type: DataType::String,
                required: false,
                ..TemplateParameter::default()
            }],
        );

        executor.execute(&template, &extracted(&[])).await.unwrap();
        let seen = datasource.seen.lock().unwrap();
        let RenderedRequest::Sql { sql, .. } = &seen[0] else {
            panic!("expected SQL request");
        };
        assert!(!sql.contains("status"));
        assert!(!sql.contains("{%"));
    }

    #[tokio::test]
    async fn test_conditional_block_kept_when_bound() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource.clone(), Duration::from_secs(5), false);
        let template = sql_template(
            "orders",
            "SELECT * FROM orders WHERE 1=1 {% if status %} AND status = :status {% endif %}",
            vec![TemplateParameter {
                name: "status".to_string(),
                data_type: DataType::String,
                required: false,
                ..TemplateParameter::default()
            }],
        );

        executor
            .execute(&template, &extracted(&[("status", serde_json::json!("shipped"))]))
            .await
            .unwrap();
        let seen = datasource.seen.lock().unwrap();
        let RenderedRequest::Sql { sql, .. } = &seen[0] else {
            panic!("expected SQL request");
        };
        assert!(sql.contains("AND status = :status"));
    }

    #[test]
    fn test_unbound_required_fails_before_dispatch() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let template = sql_template(
            "find_customer",
            "SELECT * FROM customers WHERE id = :customer_id",
            vec![int_param("customer_id", true)],
        );

        let err = executor.render(&template, &extracted(&[])).unwrap_err();
        assert!(matches!(err, Error::RenderingFailed { .. }));
        assert!(err.to_string().contains("unbound placeholder :customer_id"));
    }

    #[test]
    fn test_unapproved_template_blocked() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), true);
        let mut template = sql_template(
            "unapproved",
            "SELECT * FROM t WHERE id = :customer_id",
            vec![int_param("customer_id", true)],
        );
        template.approved = false;

        let err = executor
            .render(&template, &extracted(&[("customer_id", serde_json::json!(1))]))
            .unwrap_err();
        assert!(err.to_string().contains("not approved"));
    }

    #[test]
    fn test_unapproved_allowed_when_flag_off() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let mut template = sql_template(
            "unapproved",
            "SELECT * FROM t WHERE id = :customer_id",
            vec![int_param("customer_id", true)],
        );
        template.approved = false;

        assert!(
            executor
                .render(&template, &extracted(&[("customer_id", serde_json::json!(1))]))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_datasource_error_carries_template_identity() {
        let datasource = MockDatasource::failing("relation does not exist");
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let template = sql_template(
            "broken",
            "SELECT * FROM t WHERE id = :customer_id",
            vec![int_param("customer_id", true)],
        );

        let err = executor
            .execute(&template, &extracted(&[("customer_id", serde_json::json!(1))]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatasourceError { ref template_id, .. } if template_id == "broken"));
    }

    #[tokio::test]
    async fn test_datasource_timeout() {
        let datasource = MockDatasource::slow(Duration::from_millis(200));
        let executor = TemplateExecutor::new(datasource, Duration::from_millis(20), false);
        let template = sql_template(
            "slow",
            "SELECT * FROM t WHERE id = :customer_id",
            vec![int_param("customer_id", true)],
        );

        let err = executor
            .execute(&template, &extracted(&[("customer_id", serde_json::json!(1))]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatasourceTimeout { .. }));
        assert_eq!(err.kind(), "datasource_timeout");
    }

    #[test]
    fn test_render_graphql_variables() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let template = RawTemplate {
            id: "launches".to_string(),
            description: "launches".to_string(),
            nl_examples: vec!["launches".to_string()],
            parameters: vec![TemplateParameter {
                name: "limit".to_string(),
                data_type: DataType::Integer,
                graphql_type: Some("Int".to_string()),
                ..TemplateParameter::default()
            }],
            graphql_template: Some(
                "query Launches($limit: Int) { launches(limit: $limit) { id } }".to_string(),
            ),
            ..RawTemplate::default()
        }
        .into_template()
        .unwrap();

        let rendered = executor
            .render(&template, &extracted(&[("limit", serde_json::json!(5))]))
            .unwrap();
        let RenderedRequest::Graphql { variables, .. } = rendered else {
            panic!("expected GraphQL request");
        };
        assert_eq!(variables["limit"], serde_json::json!(5));
    }

    #[test]
    fn test_render_http_routes_locations() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let template = RawTemplate {
            id: "user_repos".to_string(),
            description: "repos".to_string(),
            nl_examples: vec!["repos".to_string()],
            parameters: vec![
                TemplateParameter {
                    name: "username".to_string(),
                    data_type: DataType::String,
                    required: true,
                    location: Some(HttpLocation::Path),
                    ..TemplateParameter::default()
                },
                TemplateParameter {
                    name: "per_page".to_string(),
                    data_type: DataType::Integer,
                    location: Some(HttpLocation::Query),
                    ..TemplateParameter::default()
                },
                TemplateParameter {
                    name: "x_request_tag".to_string(),
                    data_type: DataType::String,
                    location: Some(HttpLocation::Header),
                    ..TemplateParameter::default()
                },
            ],
            endpoint_template: Some("/users/{username}/repos".to_string()),
            http_method: Some("GET".to_string()),
            ..RawTemplate::default()
        }
        .into_template()
        .unwrap();

        let rendered = executor
            .render(
                &template,
                &extracted(&[
                    ("username", serde_json::json!("octo cat")),
                    ("per_page", serde_json::json!(10)),
                    ("x_request_tag", serde_json::json!("intent")),
                ]),
            )
            .unwrap();
        let RenderedRequest::Http {
            path,
            query,
            headers,
            ..
        } = rendered
        else {
            panic!("expected HTTP request");
        };
        assert_eq!(path, "/users/octo%20cat/repos");
        assert_eq!(query, vec![("per_page".to_string(), "10".to_string())]);
        assert_eq!(headers.get("x_request_tag").map(String::as_str), Some("intent"));
    }

    #[test]
    fn test_render_http_unbound_path_placeholder() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let template = RawTemplate {
            id: "user_repos".to_string(),
            description: "repos".to_string(),
            nl_examples: vec!["repos".to_string()],
            parameters: vec![TemplateParameter {
                name: "username".to_string(),
                data_type: DataType::String,
                required: true,
                location: Some(HttpLocation::Path),
                ..TemplateParameter::default()
            }],
            endpoint_template: Some("/users/{username}/repos".to_string()),
            ..RawTemplate::default()
        }
        .into_template()
        .unwrap();

        let err = executor.render(&template, &extracted(&[])).unwrap_err();
        assert!(err.to_string().contains("unbound path placeholder"));
    }

    #[test]
    fn test_render_http_body_parameter() {
        let datasource = MockDatasource::returning(vec![]);
        let executor = TemplateExecutor::new(datasource, Duration::from_secs(5), false);
        let template = RawTemplate {
            id: "search".to_string(),
            description: "search".to_string(),
            nl_examples: vec!["search".to_string()],
            parameters: vec![TemplateParameter {
                name: "term".to_string(),
                data_type: DataType::String,
                required: true,
                location: Some(HttpLocation::Body),
                ..TemplateParameter::default()
            }],
            endpoint_template: Some("/search".to_string()),
            http_method: Some("POST".to_string()),
            ..RawTemplate::default()
        }
        .into_template()
        .unwrap();

        let rendered = executor
            .render(&template, &extracted(&[("term", serde_json::json!("widgets"))]))
            .unwrap();
        let RenderedRequest::Http { body, .. } = rendered else {
            panic!("expected HTTP request");
        };
        assert_eq!(body.unwrap()["term"], serde_json::json!("widgets"));
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("plain"), "plain");
        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
    }
}
