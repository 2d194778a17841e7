//! Template types.
//!
//! A template is a parameterized query (SQL text, GraphQL document, or HTTP
//! request shape) plus the metadata that drives matching and extraction:
//! description, natural-language examples, tags, and parameter declarations.

use crate::models::DataType;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

// The placeholder patterns are fixed literals; construction cannot fail.
#[allow(clippy::unwrap_used)]
static SQL_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // `::` excludes Postgres casts like `total::numeric`.
    Regex::new(r"(?:^|[^:\w]):([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

#[allow(clippy::unwrap_used)]
static GRAPHQL_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

#[allow(clippy::unwrap_used)]
static GRAPHQL_DECLARED_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());

#[allow(clippy::unwrap_used)]
static HTTP_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[allow(clippy::unwrap_used)]
static CONDITIONAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*(if\s+([A-Za-z_][A-Za-z0-9_]*)|endif)\s*%\}").unwrap());

/// How a template's results are shaped into context items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    /// One context item per row.
    #[default]
    List,
    /// One context item carrying a single value.
    Scalar,
    /// One context item summarizing all rows.
    Summary,
}

/// GraphQL operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphqlOperation {
    /// Read-only query.
    #[default]
    Query,
    /// Mutation (write templates are out of scope for the engine but the
    /// document kind is preserved on load).
    Mutation,
    /// Subscription.
    Subscription,
}

/// Where an HTTP parameter is placed in the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpLocation {
    /// Substituted into the endpoint path.
    Path,
    /// Appended to the query string.
    #[default]
    Query,
    /// Sent as a request header.
    Header,
    /// Placed into the JSON request body.
    Body,
}

/// Semantic tags describing what a template does.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticTags {
    /// Primary action (e.g., "find", "list", "aggregate").
    #[serde(default)]
    pub action: Option<String>,
    /// Main entity the template operates on.
    #[serde(default)]
    pub primary_entity: Option<String>,
    /// Secondary entity, if any.
    #[serde(default)]
    pub secondary_entity: Option<String>,
    /// Additional qualifiers (e.g., "recent", "by_id").
    #[serde(default)]
    pub qualifiers: Vec<String>,
}

/// Declarative mapping from a raw response document to result items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMapping {
    /// Dot-path to the list of items within the response document
    /// (e.g., `data.launches`). Empty means the response root.
    #[serde(default)]
    pub items_path: String,
    /// Output field name → source field name within each item.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// A declared template parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateParameter {
    /// Parameter name; must match the placeholders in the body.
    pub name: String,
    /// Declared data type.
    #[serde(default, alias = "type")]
    pub data_type: DataType,
    /// Whether the parameter must be bound before execution.
    #[serde(default)]
    pub required: bool,
    /// Human description shown to the LLM.
    #[serde(default)]
    pub description: String,
    /// Example value shown to the LLM.
    #[serde(default)]
    pub example: Option<serde_json::Value>,
    /// Default injected when the LLM leaves the parameter unset.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Allowed values when the parameter is an enum.
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Validation regex applied to string values.
    #[serde(default)]
    pub validation_regex: Option<String>,
    /// GraphQL type notation (e.g., `Int!`) for GraphQL templates.
    #[serde(default)]
    pub graphql_type: Option<String>,
    /// Request location for HTTP templates.
    #[serde(default)]
    pub location: Option<HttpLocation>,
}

/// The executable body of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateBody {
    /// SQL text with named `:name` placeholders.
    Sql {
        /// The SQL text, possibly containing conditional blocks.
        sql: String,
    },
    /// GraphQL operation with `$name` variables.
    Graphql {
        /// The GraphQL document.
        document: String,
        /// Operation kind.
        operation: GraphqlOperation,
    },
    /// HTTP request shape with `{name}` path placeholders.
    Http {
        /// Uppercase HTTP method.
        method: String,
        /// Endpoint path template (e.g., `/users/{username}/repos`).
        endpoint: String,
        /// Static headers sent with every request.
        headers: BTreeMap<String, String>,
        /// JSON body template, if any.
        body: Option<serde_json::Value>,
    },
}

impl TemplateBody {
    /// Returns the body's source kind string (`sql`, `graphql`, or `http`).
    #[must_use]
    pub const fn source_kind(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
            Self::Graphql { .. } => "graphql",
            Self::Http { .. } => "http",
        }
    }

    /// Returns the raw body text used for content hashing.
    #[must_use]
    pub fn hash_text(&self) -> String {
        match self {
            Self::Sql { sql } => sql.clone(),
            Self::Graphql {
                document,
                operation,
            } => format!("{} {document}", operation.as_str()),
            Self::Http {
                method,
                endpoint,
                headers,
                body,
            } => {
                let mut text = format!("{method} {endpoint}");
                for (name, value) in headers {
                    text.push_str(&format!(" {name}:{value}"));
                }
                if let Some(body) = body {
                    text.push(' ');
                    text.push_str(&body.to_string());
                }
                text
            },
        }
    }

    /// Returns the set of placeholder names appearing in the body, including
    /// those inside conditional blocks.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<String> {
        match self {
            Self::Sql { sql } => SQL_PLACEHOLDER
                .captures_iter(sql)
                .map(|c| c[1].to_string())
                .collect(),
            Self::Graphql { document, .. } => GRAPHQL_VARIABLE
                .captures_iter(document)
                .map(|c| c[1].to_string())
                .collect(),
            Self::Http { endpoint, body, .. } => {
                let mut names: BTreeSet<String> = HTTP_PLACEHOLDER
                    .captures_iter(endpoint)
                    .map(|c| c[1].to_string())
                    .collect();
                if let Some(body) = body {
                    collect_json_placeholders(body, &mut names);
                }
                names
            },
        }
    }
}

impl GraphqlOperation {
    /// Returns the operation as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

fn collect_json_placeholders(value: &serde_json::Value, names: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => {
            for capture in HTTP_PLACEHOLDER.captures_iter(s) {
                names.insert(capture[1].to_string());
            }
        },
        serde_json::Value::Array(items) => {
            for item in items {
                collect_json_placeholders(item, names);
            }
        },
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_json_placeholders(item, names);
            }
        },
        _ => {},
    }
}

/// A span of body text guarded by a `{% if name %} ... {% endif %}` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalBlock {
    /// Parameter the block is conditioned on.
    pub parameter: String,
    /// Byte offset of the opening marker.
    pub start: usize,
    /// Byte offset just past the closing marker.
    pub end: usize,
}

/// Parses the conditional blocks of a body.
///
/// Blocks must be flat: an `{% if %}` must be closed by `{% endif %}` before
/// the next `{% if %}` opens, and every marker must be paired.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for nested, unclosed, or dangling markers.
pub fn parse_conditional_blocks(body: &str) -> Result<Vec<ConditionalBlock>> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, usize)> = None;

    for capture in CONDITIONAL_TOKEN.captures_iter(body) {
        let Some(token) = capture.get(0) else {
            continue;
        };
        if let Some(parameter) = capture.get(2) {
            if let Some((open_param, _)) = &open {
                return Err(Error::InvalidInput(format!(
                    "nested conditional block: '{}' opened inside '{open_param}'",
                    parameter.as_str()
                )));
            }
            open = Some((parameter.as_str().to_string(), token.start()));
        } else {
            let Some((parameter, start)) = open.take() else {
                return Err(Error::InvalidInput(
                    "dangling {% endif %} without an opening block".to_string(),
                ));
            };
            blocks.push(ConditionalBlock {
                parameter,
                start,
                end: token.end(),
            });
        }
    }

    if let Some((parameter, _)) = open {
        return Err(Error::InvalidInput(format!(
            "unclosed conditional block for parameter '{parameter}'"
        )));
    }

    Ok(blocks)
}

/// Renders conditional blocks: a block is kept (markers stripped) when its
/// parameter has a value, and removed entirely when it does not.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the blocks are malformed.
pub fn render_conditionals<F>(body: &str, has_value: F) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    let blocks = parse_conditional_blocks(body)?;
    if blocks.is_empty() {
        return Ok(body.to_string());
    }

    let mut rendered = String::with_capacity(body.len());
    let mut cursor = 0;
    for block in &blocks {
        rendered.push_str(&body[cursor..block.start]);
        if has_value(&block.parameter) {
            let inner = &body[block.start..block.end];
            // Strip the opening and closing markers, keep the guarded text.
            let inner = CONDITIONAL_TOKEN.replace_all(inner, "");
            rendered.push_str(&inner);
        }
        cursor = block.end;
    }
    rendered.push_str(&body[cursor..]);
    Ok(rendered)
}

/// Returns every `:name` SQL placeholder occurrence in order, as the byte
/// range covering `:name` and the bare parameter name.
#[must_use]
pub fn sql_placeholder_spans(sql: &str) -> Vec<(std::ops::Range<usize>, String)> {
    SQL_PLACEHOLDER
        .captures_iter(sql)
        .filter_map(|capture| {
            capture.get(1).map(|name| {
                (
                    name.start() - 1..name.end(),
                    name.as_str().to_string(),
                )
            })
        })
        .collect()
}

/// Extracts the variable names declared in a GraphQL operation signature
/// (the `$name: Type` pairs).
#[must_use]
pub fn declared_graphql_variables(document: &str) -> BTreeSet<String> {
    GRAPHQL_DECLARED_VARIABLE
        .captures_iter(document)
        .map(|c| c[1].to_string())
        .collect()
}

/// A parameterized query template plus its matching metadata.
#[derive(Debug, Clone)]
pub struct Template {
    /// Unique id within the library.
    pub id: String,
    /// Template version, included in the stored record metadata.
    pub version: Option<String>,
    /// Human description; leads the embedding text.
    pub description: String,
    /// Natural-language examples (at least one required).
    pub nl_examples: Vec<String>,
    /// Declared parameters in document order.
    pub parameters: Vec<TemplateParameter>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Semantic tags.
    pub semantic_tags: Option<SemanticTags>,
    /// Response mapping for nested result documents.
    pub response_mapping: Option<ResponseMapping>,
    /// Result shaping mode.
    pub result_format: ResultFormat,
    /// Whether the template is approved for execution in approved-only mode.
    pub approved: bool,
    /// Executable body.
    pub body: TemplateBody,
}

impl Template {
    /// Looks up a parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&TemplateParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Returns the declared parameter names in document order.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Raw on-disk template shape.
///
/// The document uses one body key per datasource kind (`sql_template`,
/// `graphql_template`, or `endpoint_template`); [`RawTemplate::into_template`]
/// converts to the typed [`Template`]. Unknown optional keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTemplate {
    /// Unique id.
    #[serde(default)]
    pub id: String,
    /// Version string.
    #[serde(default)]
    pub version: Option<String>,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Natural-language examples.
    #[serde(default)]
    pub nl_examples: Vec<String>,
    /// Declared parameters.
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Semantic tags.
    #[serde(default)]
    pub semantic_tags: Option<SemanticTags>,
    /// Response mapping.
    #[serde(default)]
    pub response_mapping: Option<ResponseMapping>,
    /// Result shaping mode.
    #[serde(default)]
    pub result_format: ResultFormat,
    /// Approval flag.
    #[serde(default)]
    pub approved: bool,
    /// SQL body.
    #[serde(default)]
    pub sql_template: Option<String>,
    /// GraphQL body.
    #[serde(default)]
    pub graphql_template: Option<String>,
    /// GraphQL operation kind.
    #[serde(default)]
    pub graphql_type: Option<GraphqlOperation>,
    /// HTTP endpoint path template.
    #[serde(default)]
    pub endpoint_template: Option<String>,
    /// HTTP method.
    #[serde(default)]
    pub http_method: Option<String>,
    /// Static HTTP headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// HTTP JSON body template.
    #[serde(default)]
    pub body_template: Option<serde_json::Value>,
}

const VALID_HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

impl RawTemplate {
    /// Converts the raw document shape into a typed [`Template`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the id is empty, when zero or more
    /// than one body key is present, or when the HTTP method is invalid.
    pub fn into_template(self) -> Result<Template> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "template is missing required field 'id'".to_string(),
            ));
        }

        let body_keys = usize::from(self.sql_template.is_some())
            + usize::from(self.graphql_template.is_some())
            + usize::from(self.endpoint_template.is_some());
        if body_keys != 1 {
            return Err(Error::InvalidInput(format!(
                "template '{}' must declare exactly one of sql_template, graphql_template, endpoint_template",
                self.id
            )));
        }

        let body = if let Some(sql) = self.sql_template {
            TemplateBody::Sql { sql }
        } else if let Some(document) = self.graphql_template {
            TemplateBody::Graphql {
                document,
                operation: self.graphql_type.unwrap_or_default(),
            }
        } else if let Some(endpoint) = self.endpoint_template {
            let method = self
                .http_method
                .as_deref()
                .unwrap_or("GET")
                .to_uppercase();
            if !VALID_HTTP_METHODS.contains(&method.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "template '{}' has invalid http_method '{method}'",
                    self.id
                )));
            }
            TemplateBody::Http {
                method,
                endpoint,
                headers: self.headers,
                body: self.body_template,
            }
        } else {
            // Unreachable given the body_keys check above.
            return Err(Error::InvalidInput(format!(
                "template '{}' has no body",
                self.id
            )));
        };

        Ok(Template {
            id: self.id,
            version: self.version,
            description: self.description,
            nl_examples: self.nl_examples,
            parameters: self.parameters,
            tags: self.tags,
            semantic_tags: self.semantic_tags,
            response_mapping: self.response_mapping,
            result_format: self.result_format,
            approved: self.approved,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_sql_placeholders() {
        let body = TemplateBody::Sql {
            sql: "SELECT id, total::numeric FROM orders WHERE customer_id = :customer_id AND order_date >= :since"
                .to_string(),
        };
        let names = body.placeholders();
        assert_eq!(
            names.iter().collect::<Vec<_>>(),
            vec!["customer_id", "since"]
        );
    }

    #[test]
    fn test_sql_placeholder_ignores_casts() {
        let body = TemplateBody::Sql {
            sql: "SELECT total::numeric FROM orders WHERE id = :id".to_string(),
        };
        let names = body.placeholders();
        assert!(!names.contains("numeric"));
        assert!(names.contains("id"));
    }

    #[test]
    fn test_graphql_placeholders() {
        let body = TemplateBody::Graphql {
            document: "query Launches($limit: Int!) { launches(limit: $limit) { id } }"
                .to_string(),
            operation: GraphqlOperation::Query,
        };
        assert!(body.placeholders().contains("limit"));
    }

    #[test]
    fn test_declared_graphql_variables() {
        let declared = declared_graphql_variables(
            "query Launches($limit: Int!, $offset: Int) { launches(limit: $limit, offset: $offset) { id } }",
        );
        assert_eq!(declared.len(), 2);
        assert!(declared.contains("limit"));
        assert!(declared.contains("offset"));
    }

    #[test]
    fn test_http_placeholders() {
        let body = TemplateBody::Http {
            method: "GET".to_string(),
            endpoint: "/users/{username}/repos".to_string(),
            headers: BTreeMap::new(),
            body: Some(serde_json::json!({"filter": "{repo_filter}"})),
        };
        let names = body.placeholders();
        assert!(names.contains("username"));
        assert!(names.contains("repo_filter"));
    }

    #[test]
    fn test_conditional_parse_flat() {
        let body = "WHERE 1=1 {% if status %} AND status = :status {% endif %} ORDER BY id";
        let blocks = parse_conditional_blocks(body).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].parameter, "status");
    }

    #[test]
    fn test_conditional_parse_rejects_nesting() {
        let body = "{% if a %} {% if b %} x {% endif %} {% endif %}";
        let err = parse_conditional_blocks(body).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn test_conditional_parse_rejects_unclosed() {
        let body = "{% if a %} x";
        assert!(parse_conditional_blocks(body).is_err());
    }

    #[test]
    fn test_conditional_parse_rejects_dangling_endif() {
        let body = "x {% endif %}";
        assert!(parse_conditional_blocks(body).is_err());
    }

    #[test]
    fn test_render_conditionals_keeps_bound_block() {
        let body = "WHERE 1=1 {% if status %}AND status = :status{% endif %}";
        let rendered = render_conditionals(body, |name| name == "status").unwrap();
        assert!(rendered.contains("AND status = :status"));
        assert!(!rendered.contains("{%"));
    }

    #[test]
    fn test_render_conditionals_drops_unbound_block() {
        let body = "WHERE 1=1 {% if status %}AND status = :status{% endif %} ORDER BY id";
        let rendered = render_conditionals(body, |_| false).unwrap();
        assert!(!rendered.contains("status"));
        assert!(rendered.contains("ORDER BY id"));
    }

    #[test]
    fn test_raw_template_requires_single_body() {
        let raw = RawTemplate {
            id: "two_bodies".to_string(),
            sql_template: Some("SELECT 1".to_string()),
            graphql_template: Some("query { x }".to_string()),
            ..RawTemplate::default()
        };
        assert!(raw.into_template().is_err());
    }

    #[test]
    fn test_raw_template_http_method_validation() {
        let raw = RawTemplate {
            id: "bad_method".to_string(),
            endpoint_template: Some("/things".to_string()),
            http_method: Some("FETCH".to_string()),
            ..RawTemplate::default()
        };
        assert!(raw.into_template().is_err());
    }

    #[test]
    fn test_raw_template_yaml_round() {
        let yaml = r"
id: find_customer
description: Find customer by ID
nl_examples:
  - Show customer 123
parameters:
  - name: customer_id
    type: integer
    required: true
    description: Customer ID
    example: 123
sql_template: 'SELECT id, name FROM customers WHERE id = :customer_id'
approved: true
";
        let raw: RawTemplate = serde_yaml_ng::from_str(yaml).unwrap();
        let template = raw.into_template().unwrap();
        assert_eq!(template.id, "find_customer");
        assert_eq!(template.parameters.len(), 1);
        assert_eq!(template.parameters[0].data_type, DataType::Integer);
        assert!(template.approved);
        assert_eq!(template.body.source_kind(), "sql");
        assert!(template.body.placeholders().contains("customer_id"));
    }
}
