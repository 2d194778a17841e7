//! LLM client abstraction.
//!
//! Provides a unified interface for the LLM providers used by parameter
//! extraction. Extraction wants deterministic, low-temperature completions
//! that contain a single JSON object; [`extract_json_from_response`] tolerates
//! the markdown fences and prose some models wrap around it.
//!
//! # Supported Providers
//!
//! | Provider | Client | Environment Variables |
//! |----------|--------|----------------------|
//! | Ollama | [`OllamaClient`] | `OLLAMA_HOST`, `OLLAMA_MODEL` |
//! | `OpenAI` | [`OpenAiClient`] | `OPENAI_API_KEY` |

mod ollama;
mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Generation options passed to the provider.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Stop sequences.
    pub stop: Vec<String>,
}

impl GenerateOptions {
    /// Builds options from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stop: Vec::new(),
        }
    }
}

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;
}

/// Builds the configured LLM provider.
///
/// # Errors
///
/// Returns an error for an unknown provider name.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaClient::from_config(config))),
        "openai" => Ok(Arc::new(OpenAiClient::from_config(config))),
        other => Err(Error::OperationFailed {
            operation: "build_llm_provider".to_string(),
            cause: format!("unknown llm provider '{other}'"),
        }),
    }
}

const MAX_ERROR_RESPONSE_CHARS: usize = 200;

/// Truncates an LLM response for inclusion in error messages.
pub(crate) fn truncate_for_error(response: &str) -> String {
    if response.chars().count() > MAX_ERROR_RESPONSE_CHARS {
        let truncated: String = response.chars().take(MAX_ERROR_RESPONSE_CHARS).collect();
        format!("{truncated}...(truncated)")
    } else {
        response.to_string()
    }
}

/// Extracts the first JSON object from an LLM response.
///
/// Models occasionally wrap their output in markdown or prose despite
/// instructions. Handled in order:
///
/// 1. ```` ```json ... ``` ```` blocks
/// 2. ```` ``` ... ``` ```` blocks without a language marker
/// 3. The first balanced `{ ... }` object in the raw text
///
/// Returns the trimmed input when no object is found, so the caller's JSON
/// parser produces the error.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some((start, end)) = trimmed.find("```json").and_then(|fence| {
        let start = fence + 7;
        trimmed[start..].find("```").map(|end| (start, end))
    }) {
        return trimmed[start..start + end].trim();
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some((start, end)) = trimmed.find("```").and_then(|fence| {
        let content_start = fence + 3;
        let after_marker = &trimmed[content_start..];
        let start = after_marker
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        trimmed[start..].find("```").map(|end| (start, end))
    }) {
        return trimmed[start..start + end].trim();
    }

    // Raw text: find the first balanced object, ignoring braces inside strings.
    if let Some(span) = first_balanced_object(trimmed) {
        return span;
    }

    trimmed
}

/// Finds the first balanced `{...}` span, skipping brace characters inside
/// JSON string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            },
            _ => {},
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"key": "value"}"#;
        let json = extract_json_from_response(response);
        assert_eq!(json, r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = "```json\n{\"key\": \"value\"}\n```";
        let json = extract_json_from_response(response);
        assert!(json.contains("\"key\""));
    }

    #[test]
    fn test_extract_json_unmarked_fence() {
        let response = "```\n{\"customer_id\": 456}\n```";
        let json = extract_json_from_response(response);
        assert_eq!(json, r#"{"customer_id": 456}"#);
    }

    #[test]
    fn test_extract_json_with_prose() {
        let response = "Here is the result: {\"key\": \"value\"} hope this helps";
        let json = extract_json_from_response(response);
        assert_eq!(json, r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_balanced_not_greedy() {
        // A trailing unmatched `}` must not be swallowed.
        let response = r#"{"a": {"b": 1}} }"#;
        let json = extract_json_from_response(response);
        assert_eq!(json, r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn test_extract_json_braces_inside_strings() {
        let response = r#"{"note": "curly } brace", "n": 2}"#;
        let json = extract_json_from_response(response);
        assert_eq!(json, response);
    }

    #[test]
    fn test_extract_json_none_found() {
        let response = "no json here";
        assert_eq!(extract_json_from_response(response), "no json here");
    }

    #[test]
    fn test_truncate_for_error() {
        let long = "x".repeat(300);
        let truncated = truncate_for_error(&long);
        assert!(truncated.len() < 300);
        assert!(truncated.ends_with("...(truncated)"));
    }
}
