//! LLM-driven parameter extraction.
//!
//! Given a candidate template and the user query, the extractor builds a
//! structured prompt, calls the LLM, parses the JSON it returns, coerces
//! values to their declared types, fills defaults, and reports one of four
//! outcomes. Vocabulary and time-window enrichment run on the query text
//! before the LLM sees it.

use crate::llm::{GenerateOptions, LlmProvider, extract_json_from_response, truncate_for_error};
use crate::models::{
    DataType, DomainConfig, ExtractedParameters, ExtractionStatus, Template, TemplateParameter,
};
use chrono::{Days, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Extracts typed parameters from natural-language queries.
pub struct ParameterExtractor {
    llm: Arc<dyn LlmProvider>,
    options: GenerateOptions,
    timeout: Duration,
}

impl ParameterExtractor {
    /// Creates an extractor over the given LLM.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, options: GenerateOptions, timeout: Duration) -> Self {
        Self {
            llm,
            options,
            timeout,
        }
    }

    /// Extracts parameters for one template.
    ///
    /// Never returns an error: failures are reported through
    /// [`ExtractionStatus`] so the engine can fall back to the next candidate.
    pub async fn extract(
        &self,
        query: &str,
        template: &Template,
        domain: &DomainConfig,
    ) -> ExtractedParameters {
        // Enrichment runs on the query text, not the LLM output.
        let normalized = domain.normalize_vocabulary(query);
        let time_window = domain.find_time_expression(&normalized.text);

        let prompt = build_extraction_prompt(&normalized.text, template);
        tracing::debug!(
            template_id = %template.id,
            provider = self.llm.name(),
            "Extracting parameters"
        );

        let response =
            match tokio::time::timeout(self.timeout, self.llm.generate(&prompt, &self.options))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(template_id = %template.id, error = %e, "LLM call failed");
                    return ExtractedParameters::failed(ExtractionStatus::LlmParseError {
                        detail: e.to_string(),
                    });
                },
                Err(_) => {
                    tracing::warn!(
                        template_id = %template.id,
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        "LLM call timed out"
                    );
                    return ExtractedParameters::failed(ExtractionStatus::LlmParseError {
                        detail: format!("LLM timed out after {}ms", self.timeout.as_millis()),
                    });
                },
            };

        let json_text = extract_json_from_response(&response);
        let parsed: serde_json::Value = match serde_json::from_str(json_text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(template_id = %template.id, error = %e, "Unparseable LLM output");
                return ExtractedParameters::failed(ExtractionStatus::LlmParseError {
                    detail: format!("invalid JSON: {e}; response: {}", truncate_for_error(&response)),
                });
            },
        };
        let serde_json::Value::Object(extracted) = parsed else {
            return ExtractedParameters::failed(ExtractionStatus::LlmParseError {
                detail: "LLM output is not a JSON object".to_string(),
            });
        };

        finalize_parameters(template, &extracted, time_window.map(|(_, days)| days))
    }
}

/// Builds the extraction prompt for one template.
///
/// Each parameter line carries name, type, requiredness, description,
/// example, default, and enum set; the query follows verbatim; the output
/// clause demands a single JSON object.
#[must_use]
pub fn build_extraction_prompt(query: &str, template: &Template) -> String {
    let mut prompt = String::from("Extract the parameter values from the user query.\n\nParameters:\n");

    for parameter in &template.parameters {
        let requiredness = if parameter.required { "required" } else { "optional" };
        prompt.push_str(&format!(
            "- {} ({}, {requiredness})",
            parameter.name,
            parameter.data_type.as_str()
        ));
        if !parameter.description.is_empty() {
            prompt.push_str(&format!(": {}", parameter.description));
        }
        if let Some(example) = &parameter.example {
            prompt.push_str(&format!(" (e.g., {example})"));
        }
        if let Some(default) = &parameter.default {
            prompt.push_str(&format!(" [default: {default}]"));
        }
        if !parameter.enum_values.is_empty() {
            prompt.push_str(&format!(" [one of: {}]", parameter.enum_values.join(", ")));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("\nUser query: \"{query}\"\n\n"));
    prompt.push_str(
        "Respond with a single JSON object mapping parameter names to values. \
         Values must match the declared types. Omit parameters that do not \
         appear in the query. Respond with JSON only, no prose.",
    );
    prompt
}

/// Applies the post-processing pipeline: coercion, time-window candidates,
/// defaults, required checks, and enum membership.
fn finalize_parameters(
    template: &Template,
    extracted: &serde_json::Map<String, serde_json::Value>,
    time_window_days: Option<i64>,
) -> ExtractedParameters {
    let mut values = BTreeMap::new();

    for parameter in &template.parameters {
        let supplied = extracted
            .get(&parameter.name)
            .filter(|v| !v.is_null())
            .cloned();

        let resolved = if let Some(raw) = supplied {
            // An explicit LLM value always wins over enrichment candidates.
            match coerce_value(&raw, parameter) {
                Ok(value) => Some(value),
                Err(detail) => {
                    return ExtractedParameters::failed(ExtractionStatus::TypeError {
                        parameter: parameter.name.clone(),
                        detail,
                    });
                },
            }
        } else if let Some(days) = time_window_days.filter(|_| is_time_window(parameter)) {
            time_window_value(parameter, days)
        } else if let Some(default) = &parameter.default {
            match coerce_value(default, parameter) {
                Ok(value) => Some(value),
                Err(detail) => {
                    return ExtractedParameters::failed(ExtractionStatus::TypeError {
                        parameter: parameter.name.clone(),
                        detail: format!("default value: {detail}"),
                    });
                },
            }
        } else {
            None
        };

        match resolved {
            Some(value) => {
                values.insert(parameter.name.clone(), value);
            },
            None if parameter.required => {
                return ExtractedParameters::failed(ExtractionStatus::MissingRequired {
                    parameter: parameter.name.clone(),
                });
            },
            None => {},
        }
    }

    ExtractedParameters {
        values,
        status: ExtractionStatus::Ok,
    }
}

/// Returns true when a parameter names a time window the enrichment step may
/// pre-fill.
fn is_time_window(parameter: &TemplateParameter) -> bool {
    let name = parameter.name.to_lowercase();
    let named_like_time = ["days", "date", "time", "since"]
        .iter()
        .any(|hint| name.contains(hint));
    named_like_time
        && matches!(
            parameter.data_type,
            DataType::Integer | DataType::Date | DataType::Datetime
        )
}

/// Converts a detected days-back window into a candidate parameter value.
fn time_window_value(parameter: &TemplateParameter, days: i64) -> Option<serde_json::Value> {
    match parameter.data_type {
        DataType::Integer => Some(serde_json::json!(days)),
        DataType::Date => {
            let date = Utc::now()
                .date_naive()
                .checked_sub_days(Days::new(days.try_into().ok()?))?;
            Some(serde_json::Value::String(date.format("%Y-%m-%d").to_string()))
        },
        DataType::Datetime => {
            let datetime = Utc::now().checked_sub_days(Days::new(days.try_into().ok()?))?;
            Some(serde_json::Value::String(datetime.to_rfc3339()))
        },
        _ => None,
    }
}

/// Coerces a raw value to the parameter's declared type.
///
/// The coercion matrix is intentionally small: string→int, string→decimal,
/// string→date, and string→bool via safe parses, plus enum canonicalization
/// with case-insensitive membership.
fn coerce_value(
    raw: &serde_json::Value,
    parameter: &TemplateParameter,
) -> std::result::Result<serde_json::Value, String> {
    use serde_json::Value;

    let coerced = match parameter.data_type {
        DataType::Integer => match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => raw.clone(),
            Value::Number(n) => {
                let whole = n.as_f64().filter(|f| f.fract() == 0.0);
                #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                let as_int = whole.and_then(|f| {
                    if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        Some(Value::from(f as i64))
                    } else {
                        None
                    }
                });
                as_int.ok_or_else(|| format!("'{n}' is not an integer"))?
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{s}' is not an integer"))?,
            other => return Err(format!("'{other}' is not an integer")),
        },
        DataType::Decimal => match raw {
            Value::Number(_) => raw.clone(),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{s}' is not a number"))?,
            other => return Err(format!("'{other}' is not a number")),
        },
        DataType::Boolean => match raw {
            Value::Bool(_) => raw.clone(),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Value::Bool(true),
                "false" | "no" => Value::Bool(false),
                _ => return Err(format!("'{s}' is not a boolean")),
            },
            other => return Err(format!("'{other}' is not a boolean")),
        },
        DataType::Date => match raw {
            Value::String(s) => {
                let trimmed = s.trim();
                let date = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .ok()
                    .or_else(|| {
                        chrono::DateTime::parse_from_rfc3339(trimmed)
                            .ok()
                            .map(|dt| dt.date_naive())
                    })
                    .ok_or_else(|| format!("'{trimmed}' is not an ISO date"))?;
                Value::String(date.format("%Y-%m-%d").to_string())
            },
            other => return Err(format!("'{other}' is not an ISO date")),
        },
        DataType::Datetime => match raw {
            Value::String(s) => {
                let trimmed = s.trim();
                let valid = chrono::DateTime::parse_from_rfc3339(trimmed).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S").is_ok()
                    || chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S").is_ok();
                if !valid {
                    return Err(format!("'{trimmed}' is not an ISO datetime"));
                }
                raw.clone()
            },
            other => return Err(format!("'{other}' is not an ISO datetime")),
        },
        DataType::String => match raw {
            Value::String(_) => raw.clone(),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            other => return Err(format!("'{other}' is not a string")),
        },
        DataType::Enum => {
            let Value::String(s) = raw else {
                return Err(format!("'{raw}' is not an enum value"));
            };
            let lowered = s.trim().to_lowercase();
            let canonical = parameter
                .enum_values
                .iter()
                .find(|allowed| allowed.to_lowercase() == lowered)
                .ok_or_else(|| {
                    format!(
                        "'{s}' is not one of [{}]",
                        parameter.enum_values.join(", ")
                    )
                })?;
            Value::String(canonical.clone())
        },
    };

    // Enum membership also applies to non-enum types that declare a value set.
    if parameter.data_type != DataType::Enum && !parameter.enum_values.is_empty() {
        let as_text = match &coerced {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let lowered = as_text.to_lowercase();
        if !parameter
            .enum_values
            .iter()
            .any(|allowed| allowed.to_lowercase() == lowered)
        {
            return Err(format!(
                "'{as_text}' is not one of [{}]",
                parameter.enum_values.join(", ")
            ));
        }
    }

    if let Some(regex_text) = &parameter.validation_regex
        && let Value::String(s) = &coerced
    {
        let matches = regex::Regex::new(regex_text)
            .map(|re| re.is_match(s))
            .unwrap_or(true);
        if !matches {
            return Err(format!("'{s}' does not match the validation pattern"));
        }
    }

    Ok(coerced)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use test_case::test_case;

    struct FixedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmProvider for FailingLlm {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String> {
            Err(crate::Error::OperationFailed {
                operation: "generate".to_string(),
                cause: "connection refused".to_string(),
            })
        }
    }

    fn extractor(response: &str) -> ParameterExtractor {
        ParameterExtractor::new(
            Arc::new(FixedLlm {
                response: response.to_string(),
            }),
            GenerateOptions::default(),
            Duration::from_secs(5),
        )
    }

    fn parameter(name: &str, data_type: DataType, required: bool) -> TemplateParameter {
        TemplateParameter {
            name: name.to_string(),
            data_type,
            required,
            ..TemplateParameter::default()
        }
    }

    fn sql_template(parameters: Vec<TemplateParameter>) -> Template {
        let placeholders: Vec<String> = parameters
            .iter()
            .map(|p| format!("{0} = :{0}", p.name))
            .collect();
        crate::models::RawTemplate {
            id: "test_template".to_string(),
            description: "test".to_string(),
            nl_examples: vec!["example".to_string()],
            parameters,
            sql_template: Some(format!("SELECT * FROM t WHERE {}", placeholders.join(" AND "))),
            ..crate::models::RawTemplate::default()
        }
        .into_template()
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_simple_integer() {
        let template = sql_template(vec![parameter("customer_id", DataType::Integer, true)]);
        let extractor = extractor(r#"{"customer_id": 456}"#);
        let result = extractor
            .extract("Show me customer 456", &template, &DomainConfig::default())
            .await;
        assert!(result.status.is_ok());
        assert_eq!(result.values["customer_id"], serde_json::json!(456));
    }

    #[tokio::test]
    async fn test_extract_tolerates_code_fences() {
        let template = sql_template(vec![parameter("customer_id", DataType::Integer, true)]);
        let extractor = extractor("```json\n{\"customer_id\": \"123\"}\n```");
        let result = extractor
            .extract("Show customer 123", &template, &DomainConfig::default())
            .await;
        assert!(result.status.is_ok());
        assert_eq!(result.values["customer_id"], serde_json::json!(123));
    }

    #[tokio::test]
    async fn test_missing_required() {
        let template = sql_template(vec![parameter("customer_id", DataType::Integer, true)]);
        let extractor = extractor("{}");
        let result = extractor
            .extract("show me stuff", &template, &DomainConfig::default())
            .await;
        assert_eq!(
            result.status,
            ExtractionStatus::MissingRequired {
                parameter: "customer_id".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_defaults_injected() {
        let mut limit = parameter("limit", DataType::Integer, false);
        limit.default = Some(serde_json::json!(5));
        let template = sql_template(vec![limit]);
        let extractor = extractor("{}");
        let result = extractor
            .extract("", &template, &DomainConfig::default())
            .await;
        assert!(result.status.is_ok());
        assert_eq!(result.values["limit"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn test_optional_without_default_left_unset() {
        let status = parameter("status", DataType::String, false);
        let template = sql_template(vec![status]);
        let extractor = extractor("{}");
        let result = extractor
            .extract("orders from toronto", &template, &DomainConfig::default())
            .await;
        assert!(result.status.is_ok());
        assert!(!result.values.contains_key("status"));
    }

    #[tokio::test]
    async fn test_llm_failure_reported() {
        let template = sql_template(vec![parameter("customer_id", DataType::Integer, true)]);
        let extractor = ParameterExtractor::new(
            Arc::new(FailingLlm),
            GenerateOptions::default(),
            Duration::from_secs(5),
        );
        let result = extractor
            .extract("anything", &template, &DomainConfig::default())
            .await;
        assert!(matches!(
            result.status,
            ExtractionStatus::LlmParseError { .. }
        ));
    }

    #[tokio::test]
    async fn test_unparseable_output_reported() {
        let template = sql_template(vec![parameter("customer_id", DataType::Integer, true)]);
        let extractor = extractor("I could not find any parameters, sorry!");
        let result = extractor
            .extract("anything", &template, &DomainConfig::default())
            .await;
        assert!(matches!(
            result.status,
            ExtractionStatus::LlmParseError { .. }
        ));
    }

    #[tokio::test]
    async fn test_enum_canonicalized_case_insensitively() {
        let mut status = parameter("status", DataType::Enum, true);
        status.enum_values = vec!["pending".into(), "shipped".into(), "delivered".into()];
        let template = sql_template(vec![status]);
        let extractor = extractor(r#"{"status": "SHIPPED"}"#);
        let result = extractor
            .extract("shipped orders", &template, &DomainConfig::default())
            .await;
        assert!(result.status.is_ok());
        assert_eq!(result.values["status"], serde_json::json!("shipped"));
    }

    #[tokio::test]
    async fn test_enum_rejection() {
        let mut status = parameter("status", DataType::Enum, true);
        status.enum_values = vec!["pending".into(), "shipped".into(), "delivered".into()];
        let template = sql_template(vec![status]);
        let extractor = extractor(r#"{"status": "banana"}"#);
        let result = extractor
            .extract("list banana orders", &template, &DomainConfig::default())
            .await;
        assert!(matches!(
            result.status,
            ExtractionStatus::TypeError { ref parameter, .. } if parameter == "status"
        ));
    }

    #[tokio::test]
    async fn test_time_window_enrichment_date() {
        let domain: DomainConfig = serde_yaml_ng::from_str(
            r"
domain_name: shop
vocabulary:
  time_expressions:
    last week: 7
",
        )
        .unwrap();
        let template = sql_template(vec![
            parameter("customer_id", DataType::Integer, true),
            parameter("since", DataType::Date, true),
        ]);
        let extractor = extractor(r#"{"customer_id": 1}"#);
        let result = extractor
            .extract("orders for customer 1 from last week", &template, &domain)
            .await;
        assert!(result.status.is_ok(), "{:?}", result.status);
        assert_eq!(result.values["customer_id"], serde_json::json!(1));

        let expected = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(7))
            .unwrap()
            .format("%Y-%m-%d")
            .to_string();
        assert_eq!(result.values["since"], serde_json::json!(expected));
    }

    #[tokio::test]
    async fn test_llm_value_overrides_time_candidate() {
        let domain: DomainConfig = serde_yaml_ng::from_str(
            r"
domain_name: shop
vocabulary:
  time_expressions:
    last week: 7
",
        )
        .unwrap();
        let template = sql_template(vec![parameter("days_back", DataType::Integer, true)]);
        let extractor = extractor(r#"{"days_back": 14}"#);
        let result = extractor
            .extract("orders from last week", &template, &domain)
            .await;
        assert!(result.status.is_ok());
        assert_eq!(result.values["days_back"], serde_json::json!(14));
    }

    #[tokio::test]
    async fn test_undeclared_fields_ignored() {
        let template = sql_template(vec![parameter("customer_id", DataType::Integer, true)]);
        let extractor = extractor(r#"{"customer_id": 1, "hallucinated": "yes"}"#);
        let result = extractor
            .extract("customer 1", &template, &DomainConfig::default())
            .await;
        assert!(result.status.is_ok());
        assert!(!result.values.contains_key("hallucinated"));
    }

    #[test_case(DataType::Integer, serde_json::json!("42"), serde_json::json!(42); "string to int")]
    #[test_case(DataType::Decimal, serde_json::json!("3.5"), serde_json::json!(3.5); "string to decimal")]
    #[test_case(DataType::Boolean, serde_json::json!("true"), serde_json::json!(true); "string to bool")]
    #[test_case(DataType::Boolean, serde_json::json!("No"), serde_json::json!(false); "no to false")]
    #[test_case(DataType::String, serde_json::json!(7), serde_json::json!("7"); "number to string")]
    #[test_case(DataType::Date, serde_json::json!("2024-06-01"), serde_json::json!("2024-06-01"); "iso date")]
    fn test_coercion_matrix(
        data_type: DataType,
        raw: serde_json::Value,
        expected: serde_json::Value,
    ) {
        let param = parameter("p", data_type, true);
        assert_eq!(coerce_value(&raw, &param).unwrap(), expected);
    }

    #[test_case(DataType::Integer, serde_json::json!("not a number"); "bad int")]
    #[test_case(DataType::Decimal, serde_json::json!("many"); "bad decimal")]
    #[test_case(DataType::Boolean, serde_json::json!("maybe"); "bad bool")]
    #[test_case(DataType::Date, serde_json::json!("June 1st"); "bad date")]
    fn test_coercion_failures(data_type: DataType, raw: serde_json::Value) {
        let param = parameter("p", data_type, true);
        assert!(coerce_value(&raw, &param).is_err());
    }

    #[test]
    fn test_validation_regex_applied() {
        let mut param = parameter("code", DataType::String, true);
        param.validation_regex = Some("^[A-Z]{3}-\\d+$".to_string());
        assert!(coerce_value(&serde_json::json!("ABC-123"), &param).is_ok());
        assert!(coerce_value(&serde_json::json!("nope"), &param).is_err());
    }

    #[test]
    fn test_prompt_contains_contract_fields() {
        let mut status = parameter("status", DataType::Enum, false);
        status.description = "Order status".to_string();
        status.example = Some(serde_json::json!("shipped"));
        status.default = Some(serde_json::json!("pending"));
        status.enum_values = vec!["pending".into(), "shipped".into()];
        let template = sql_template(vec![status]);

        let prompt = build_extraction_prompt("show pending orders", &template);
        assert!(prompt.contains("status (enum, optional)"));
        assert!(prompt.contains("Order status"));
        assert!(prompt.contains("e.g., \"shipped\""));
        assert!(prompt.contains("default: \"pending\""));
        assert!(prompt.contains("one of: pending, shipped"));
        assert!(prompt.contains("show pending orders"));
        assert!(prompt.contains("single JSON object"));
    }
}
