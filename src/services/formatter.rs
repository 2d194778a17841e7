//! Result formatting into retrieval context.
//!
//! Converts raw execution rows into context items using the template's
//! response mapping and the domain's declarative display formats. Formatting
//! is a single linear pass; domain-specific presentation lives in the domain
//! document, not in code.

use crate::models::{
    ContextMetadata, DomainConfig, ExecutionResult, ExtractedParameters, ResultFormat,
    RetrievalContextItem, Template, TemplateBody,
};

/// Maximum rows inlined into a summary item.
const SUMMARY_ROW_LIMIT: usize = 5;

/// Converts execution results into retrieval context items.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Creates a formatter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Formats one template invocation's results.
    ///
    /// Produces one item per row for `list` templates, exactly one item for
    /// `scalar` and `summary` templates, and a single "No results found."
    /// item when the execution returned nothing.
    #[must_use]
    pub fn format(
        &self,
        domain: &DomainConfig,
        template: &Template,
        similarity: f32,
        params: &ExtractedParameters,
        result: &ExecutionResult,
    ) -> Vec<RetrievalContextItem> {
        let items = locate_items(template, result);
        let metadata = |count: usize| ContextMetadata {
            template_id: Some(template.id.clone()),
            parameters_used: params.values.clone(),
            result_count: count,
            error: None,
            detail: None,
            source_kind: Some(template.body.source_kind().to_string()),
        };

        if items.is_empty() {
            return vec![RetrievalContextItem {
                content: "No results found.".to_string(),
                confidence: similarity,
                metadata: metadata(0),
            }];
        }

        let records: Vec<serde_json::Value> = items
            .iter()
            .map(|item| map_record(template, domain, item))
            .collect();

        match template.result_format {
            ResultFormat::List => records
                .iter()
                .map(|record| RetrievalContextItem {
                    content: render_record(record),
                    confidence: similarity,
                    metadata: metadata(records.len()),
                })
                .collect(),
            ResultFormat::Scalar => {
                let content = records
                    .first()
                    .map(scalar_content)
                    .unwrap_or_default();
                vec![RetrievalContextItem {
                    content,
                    confidence: similarity,
                    metadata: metadata(records.len()),
                }]
            },
            ResultFormat::Summary => {
                let mut lines = vec![format!(
                    "{}: {} result{}",
                    template.description,
                    records.len(),
                    if records.len() == 1 { "" } else { "s" }
                )];
                for record in records.iter().take(SUMMARY_ROW_LIMIT) {
                    lines.push(render_record(record));
                }
                if records.len() > SUMMARY_ROW_LIMIT {
                    lines.push(format!("… and {} more", records.len() - SUMMARY_ROW_LIMIT));
                }
                vec![RetrievalContextItem {
                    content: lines.join("\n"),
                    confidence: similarity,
                    metadata: metadata(records.len()),
                }]
            },
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Locates the record list within the execution result.
///
/// SQL rows are already flat. GraphQL and HTTP executions return a single
/// response document that `response_mapping.items_path` points into.
fn locate_items(template: &Template, result: &ExecutionResult) -> Vec<serde_json::Value> {
    match &template.body {
        TemplateBody::Sql { .. } => result.rows.clone(),
        TemplateBody::Graphql { .. } | TemplateBody::Http { .. } => {
            let Some(document) = result.rows.first() else {
                return Vec::new();
            };
            let items_path = template
                .response_mapping
                .as_ref()
                .map(|mapping| mapping.items_path.as_str())
                .unwrap_or_default();
            let located = walk_path(document, items_path);
            match located {
                Some(serde_json::Value::Array(items)) => items.clone(),
                Some(serde_json::Value::Null) | None => Vec::new(),
                Some(other) => vec![other.clone()],
            }
        },
    }
}

/// Walks a dot-path into a JSON document.
fn walk_path<'a>(document: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(document);
    }
    let mut current = document;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Applies the per-field response mapping and display formats to one record.
fn map_record(
    template: &Template,
    domain: &DomainConfig,
    item: &serde_json::Value,
) -> serde_json::Value {
    let field_mapping = template
        .response_mapping
        .as_ref()
        .map(|mapping| &mapping.fields);

    let source = match item.as_object() {
        Some(object) => object,
        // Scalar items (e.g., a bare count) pass through untouched.
        None => return item.clone(),
    };

    let mut record = serde_json::Map::new();
    if let Some(fields) = field_mapping.filter(|fields| !fields.is_empty()) {
        for (output_name, source_name) in fields {
            let value = source
                .get(source_name)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            record.insert(
                output_name.clone(),
                apply_display_format(domain, output_name, value),
            );
        }
    } else {
        for (name, value) in source {
            record.insert(
                name.clone(),
                apply_display_format(domain, name, value.clone()),
            );
        }
    }
    serde_json::Value::Object(record)
}

/// Applies the domain's display format for a field, if one is declared.
fn apply_display_format(
    domain: &DomainConfig,
    field_name: &str,
    value: serde_json::Value,
) -> serde_json::Value {
    let Some(format) = domain.display_format_for(field_name) else {
        return value;
    };
    match format {
        "currency" => format_currency(&value),
        "percentage" => format_percentage(&value),
        "phone" => format_phone(&value),
        "date" => format_date(&value),
        _ => value,
    }
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn format_currency(value: &serde_json::Value) -> serde_json::Value {
    as_f64(value).map_or_else(
        || value.clone(),
        |amount| serde_json::Value::String(format!("${amount:.2}")),
    )
}

fn format_percentage(value: &serde_json::Value) -> serde_json::Value {
    as_f64(value).map_or_else(
        || value.clone(),
        |ratio| serde_json::Value::String(format!("{:.1}%", ratio * 100.0)),
    )
}

fn format_phone(value: &serde_json::Value) -> serde_json::Value {
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    let formatted = match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => format!(
            "+1 ({}) {}-{}",
            &digits[1..4],
            &digits[4..7],
            &digits[7..]
        ),
        _ => return value.clone(),
    };
    serde_json::Value::String(formatted)
}

fn format_date(value: &serde_json::Value) -> serde_json::Value {
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    let trimmed = text.trim();
    let date = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        });
    date.map_or_else(
        || value.clone(),
        |d| serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
    )
}

/// Renders a record as `name: value` pairs in stable field order.
fn render_record(record: &serde_json::Value) -> String {
    match record {
        serde_json::Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            names
                .iter()
                .map(|name| format!("{name}: {}", render_value(&map[name.as_str()])))
                .collect::<Vec<_>>()
                .join("; ")
        },
        other => render_value(other),
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Scalar content: the first value of the record.
fn scalar_content(record: &serde_json::Value) -> String {
    match record {
        serde_json::Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            names
                .first()
                .map(|name| render_value(&map[name.as_str()]))
                .unwrap_or_default()
        },
        other => render_value(other),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{ExtractedParameters, RawTemplate, ResponseMapping, TemplateParameter};
    use std::collections::BTreeMap;

    fn domain() -> DomainConfig {
        serde_yaml_ng::from_str(
            r"
domain_name: ecommerce
fields:
  order:
    total:
      data_type: decimal
      display_format: currency
    discount_rate:
      data_type: decimal
      display_format: percentage
    order_date:
      data_type: date
      display_format: date
  customer:
    phone:
      data_type: string
      display_format: phone
",
        )
        .unwrap()
    }

    fn sql_template(result_format: ResultFormat) -> Template {
        let mut raw = RawTemplate {
            id: "orders".to_string(),
            description: "Orders for a customer".to_string(),
            nl_examples: vec!["orders".to_string()],
            parameters: vec![TemplateParameter {
                name: "customer_id".to_string(),
                required: true,
                ..TemplateParameter::default()
            }],
            sql_template: Some("SELECT * FROM orders WHERE customer_id = :customer_id".to_string()),
            ..RawTemplate::default()
        };
        raw.result_format = result_format;
        raw.into_template().unwrap()
    }

    fn formatter_output(
        template: &Template,
        rows: Vec<serde_json::Value>,
    ) -> Vec<RetrievalContextItem> {
        ResultFormatter::new().format(
            &domain(),
            template,
            0.85,
            &ExtractedParameters::empty(),
            &ExecutionResult::from_rows(rows, 3),
        )
    }

    #[test]
    fn test_list_format_one_item_per_row() {
        let template = sql_template(ResultFormat::List);
        let items = formatter_output(
            &template,
            vec![
                serde_json::json!({"id": 1, "total": 10.5}),
                serde_json::json!({"id": 2, "total": 20.0}),
            ],
        );
        assert_eq!(items.len(), 2);
        assert!(items[0].content.contains("id: 1"));
        assert!(items[0].content.contains("total: $10.50"));
        assert_eq!(items[0].metadata.result_count, 2);
        assert!((items[0].confidence - 0.85).abs() < f32::EPSILON);
        assert_eq!(items[0].metadata.source_kind.as_deref(), Some("sql"));
    }

    #[test]
    fn test_summary_format_single_item() {
        let template = sql_template(ResultFormat::Summary);
        let items = formatter_output(
            &template,
            vec![
                serde_json::json!({"id": 1}),
                serde_json::json!({"id": 2}),
                serde_json::json!({"id": 3}),
            ],
        );
        assert_eq!(items.len(), 1);
        assert!(items[0].content.contains("Orders for a customer: 3 results"));
        assert_eq!(items[0].metadata.result_count, 3);
    }

    #[test]
    fn test_scalar_format() {
        let template = sql_template(ResultFormat::Scalar);
        let items = formatter_output(&template, vec![serde_json::json!({"count": 42})]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "42");
    }

    #[test]
    fn test_zero_rows_item() {
        let template = sql_template(ResultFormat::List);
        let items = formatter_output(&template, vec![]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "No results found.");
        assert_eq!(items[0].metadata.result_count, 0);
        // Confidence is preserved on empty results.
        assert!((items[0].confidence - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(
            format_currency(&serde_json::json!(1234.5)),
            serde_json::json!("$1234.50")
        );
        assert_eq!(
            format_percentage(&serde_json::json!(0.157)),
            serde_json::json!("15.7%")
        );
        assert_eq!(
            format_phone(&serde_json::json!("4165551234")),
            serde_json::json!("(416) 555-1234")
        );
        assert_eq!(
            format_phone(&serde_json::json!("14165551234")),
            serde_json::json!("+1 (416) 555-1234")
        );
        assert_eq!(
            format_date(&serde_json::json!("2024-06-01T10:00:00Z")),
            serde_json::json!("2024-06-01")
        );
        // Unknown shapes pass through unchanged.
        assert_eq!(
            format_phone(&serde_json::json!("ext. 12")),
            serde_json::json!("ext. 12")
        );
    }

    #[test]
    fn test_graphql_items_path() {
        let raw = RawTemplate {
            id: "launches".to_string(),
            description: "Launches".to_string(),
            nl_examples: vec!["launches".to_string()],
            parameters: vec![TemplateParameter {
                name: "limit".to_string(),
                default: Some(serde_json::json!(5)),
                ..TemplateParameter::default()
            }],
            graphql_template: Some(
                "query Launches($limit: Int) { launches(limit: $limit) { id mission } }"
                    .to_string(),
            ),
            response_mapping: Some(ResponseMapping {
                items_path: "launches".to_string(),
                fields: BTreeMap::new(),
            }),
            ..RawTemplate::default()
        };
        let template = raw.into_template().unwrap();

        let document = serde_json::json!({
            "launches": [
                {"id": "1", "mission": "Starlink"},
                {"id": "2", "mission": "CRS"},
            ]
        });
        let items = formatter_output(&template, vec![document]);
        assert_eq!(items.len(), 2);
        assert!(items[0].content.contains("Starlink"));
        assert_eq!(items[0].metadata.source_kind.as_deref(), Some("graphql"));
    }

    #[test]
    fn test_response_mapping_fields() {
        let raw = RawTemplate {
            id: "mapped".to_string(),
            description: "Mapped".to_string(),
            nl_examples: vec!["mapped".to_string()],
            sql_template: Some("SELECT * FROM t".to_string()),
            response_mapping: Some(ResponseMapping {
                items_path: String::new(),
                fields: BTreeMap::from([
                    ("customer".to_string(), "cust_name".to_string()),
                    ("total".to_string(), "order_total".to_string()),
                ]),
            }),
            ..RawTemplate::default()
        };
        let template = raw.into_template().unwrap();

        let items = formatter_output(
            &template,
            vec![serde_json::json!({"cust_name": "Ada", "order_total": 99.9, "noise": true})],
        );
        assert_eq!(items.len(), 1);
        assert!(items[0].content.contains("customer: Ada"));
        assert!(items[0].content.contains("total: $99.90"));
        assert!(!items[0].content.contains("noise"));
    }

    #[test]
    fn test_nested_items_path() {
        let raw = RawTemplate {
            id: "nested".to_string(),
            description: "Nested".to_string(),
            nl_examples: vec!["nested".to_string()],
            endpoint_template: Some("/things".to_string()),
            response_mapping: Some(ResponseMapping {
                items_path: "data.results".to_string(),
                fields: BTreeMap::new(),
            }),
            ..RawTemplate::default()
        };
        let template = raw.into_template().unwrap();
        let document = serde_json::json!({"data": {"results": [{"name": "thing"}]}});
        let items = formatter_output(&template, vec![document]);
        assert_eq!(items.len(), 1);
        assert!(items[0].content.contains("thing"));
    }
}
