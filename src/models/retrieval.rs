//! Per-request types: candidates, extracted parameters, execution results,
//! and retrieval context items.

use crate::models::Template;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A template selected by vector similarity as a possible answer for a query.
#[derive(Debug, Clone)]
pub struct CandidateMatch {
    /// The candidate template.
    pub template: Arc<Template>,
    /// Similarity in [0, 1]; `1 − distance` for cosine-like stores.
    pub similarity: f32,
    /// Zero-based rank among the returned candidates.
    pub rank: usize,
}

/// Outcome of parameter extraction for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// All declared parameters were resolved.
    Ok,
    /// A required parameter remained unset after defaults were applied.
    MissingRequired {
        /// The unset parameter.
        parameter: String,
    },
    /// A value could not be coerced to its declared type, or failed an enum
    /// or validation-regex check.
    TypeError {
        /// The offending parameter.
        parameter: String,
        /// What went wrong.
        detail: String,
    },
    /// The LLM call failed, timed out, or returned no parseable JSON object.
    LlmParseError {
        /// What went wrong.
        detail: String,
    },
}

impl ExtractionStatus {
    /// Returns true when extraction succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns the status as a stable string for logs and metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::MissingRequired { .. } => "missing_required",
            Self::TypeError { .. } => "type_error",
            Self::LlmParseError { .. } => "llm_parse_error",
        }
    }
}

/// Parameter values extracted from a query for one template.
#[derive(Debug, Clone)]
pub struct ExtractedParameters {
    /// Parameter name → typed value.
    pub values: BTreeMap<String, serde_json::Value>,
    /// Extraction outcome.
    pub status: ExtractionStatus,
}

impl ExtractedParameters {
    /// Creates an empty, successful extraction.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
            status: ExtractionStatus::Ok,
        }
    }

    /// Creates a failed extraction with no values.
    #[must_use]
    pub const fn failed(status: ExtractionStatus) -> Self {
        Self {
            values: BTreeMap::new(),
            status,
        }
    }
}

/// Raw result of executing a template against a datasource.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Returned records in datasource order.
    pub rows: Vec<serde_json::Value>,
    /// Number of returned records.
    pub row_count: usize,
    /// Error description when execution failed.
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds.
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// Creates a successful result from rows.
    #[must_use]
    pub fn from_rows(rows: Vec<serde_json::Value>, elapsed_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            row_count,
            error: None,
            elapsed_ms,
        }
    }
}

/// Metadata attached to a retrieval context item.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextMetadata {
    /// The template that produced the item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// The parameter values bound at execution time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters_used: BTreeMap<String, serde_json::Value>,
    /// Number of records the execution returned.
    pub result_count: usize,
    /// Error kind when the pipeline failed (e.g., `no_matching_template`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable detail accompanying an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Datasource kind that produced the rows (`sql`, `graphql`, `http`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<String>,
}

/// One formatted piece of retrieval context returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalContextItem {
    /// Formatted content text.
    pub content: String,
    /// Similarity of the winning template, or 0.0 on failure.
    pub confidence: f32,
    /// Item metadata.
    pub metadata: ContextMetadata,
}

impl RetrievalContextItem {
    /// Builds the zero-confidence item used for pipeline failures.
    #[must_use]
    pub fn error_item(content: impl Into<String>, error_kind: &str, detail: Option<String>) -> Self {
        Self {
            content: content.into(),
            confidence: 0.0,
            metadata: ContextMetadata {
                error: Some(error_kind.to_string()),
                detail,
                ..ContextMetadata::default()
            },
        }
    }
}

/// Per-request options for [`retrieve_context`].
///
/// [`retrieve_context`]: crate::services::RetrievalEngine::retrieve_context
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveOptions {
    /// Overrides the configured K for vector search.
    pub max_results: Option<usize>,
    /// Overrides the configured confidence threshold.
    pub confidence_threshold: Option<f32>,
    /// Emits per-step debug logs for this request.
    pub trace: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_status_strings() {
        assert_eq!(ExtractionStatus::Ok.as_str(), "ok");
        assert!(ExtractionStatus::Ok.is_ok());
        let status = ExtractionStatus::MissingRequired {
            parameter: "customer_id".to_string(),
        };
        assert_eq!(status.as_str(), "missing_required");
        assert!(!status.is_ok());
    }

    #[test]
    fn test_execution_result_from_rows() {
        let rows = vec![serde_json::json!({"id": 1}), serde_json::json!({"id": 2})];
        let result = ExecutionResult::from_rows(rows, 12);
        assert_eq!(result.row_count, 2);
        assert!(result.error.is_none());
        assert_eq!(result.elapsed_ms, 12);
    }

    #[test]
    fn test_error_item_shape() {
        let item = RetrievalContextItem::error_item(
            "No matching template found.",
            "no_matching_template",
            Some("best similarity 0.41 below threshold 0.75".to_string()),
        );
        assert!((item.confidence - 0.0).abs() < f32::EPSILON);
        assert_eq!(item.metadata.error.as_deref(), Some("no_matching_template"));
        assert_eq!(item.metadata.result_count, 0);
    }
}
