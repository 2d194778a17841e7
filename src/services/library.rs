//! Template library and load-time validation.

use crate::models::{
    DomainConfig, RawTemplate, Template, TemplateBody, declared_graphql_variables,
    parse_conditional_blocks,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A single validation finding for a template.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// The template the finding applies to.
    pub template_id: String,
    /// What was found.
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "template '{}': {}", self.template_id, self.message)
    }
}

/// Findings accumulated while validating a template document set.
///
/// Errors exclude a template from the loaded library; warnings do not.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Findings that excluded a template.
    pub errors: Vec<ValidationIssue>,
    /// Advisory findings.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns true when no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, template_id: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            template_id: template_id.to_string(),
            message: message.into(),
        });
    }

    fn warning(&mut self, template_id: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            template_id: template_id.to_string(),
            message: message.into(),
        });
    }
}

/// In-memory collection of templates with O(1) lookup by id.
///
/// Immutable after load; reloads construct a fresh library and swap it in.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: HashMap<String, Arc<Template>>,
    order: Vec<String>,
}

impl TemplateLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a library from raw template documents, validating each against
    /// the domain. Templates with errors are reported and excluded; the
    /// caller decides whether a partially loaded library is acceptable.
    #[must_use]
    pub fn from_raw(raw_templates: Vec<RawTemplate>, domain: &DomainConfig) -> (Self, ValidationReport) {
        let mut report = ValidationReport::default();
        let mut library = Self::default();

        for raw in raw_templates {
            let raw_id = raw.id.clone();
            let template = match raw.into_template() {
                Ok(template) => template,
                Err(e) => {
                    let id = if raw_id.is_empty() { "<unknown>" } else { &raw_id };
                    report.error(id, e.to_string());
                    continue;
                },
            };

            if library.templates.contains_key(&template.id) {
                report.error(&template.id, "duplicate template id");
                continue;
            }

            let before = report.errors.len();
            validate_template(&template, domain, &mut report);
            if report.errors.len() > before {
                continue;
            }

            library.order.push(template.id.clone());
            library
                .templates
                .insert(template.id.clone(), Arc::new(template));
        }

        (library, report)
    }

    /// Returns all templates in document order.
    #[must_use]
    pub fn all_templates(&self) -> Vec<Arc<Template>> {
        self.order
            .iter()
            .filter_map(|id| self.templates.get(id).cloned())
            .collect()
    }

    /// Looks up a template by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.get(id).cloned()
    }

    /// Returns the number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true when the library holds no templates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Re-validates every loaded template against a domain.
    #[must_use]
    pub fn validate(&self, domain: &DomainConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        for id in &self.order {
            if let Some(template) = self.templates.get(id) {
                validate_template(template, domain, &mut report);
            }
        }
        report
    }
}

fn validate_template(template: &Template, domain: &DomainConfig, report: &mut ValidationReport) {
    let id = &template.id;

    if template.description.trim().is_empty() {
        report.error(id, "missing required field 'description'");
    }
    if template.nl_examples.is_empty() {
        report.error(id, "missing natural-language examples");
    } else if template.nl_examples.len() < 3 {
        report.warning(
            id,
            format!(
                "only {} nl_examples (recommend at least 3 for better matching)",
                template.nl_examples.len()
            ),
        );
    }

    let parameter_names: Vec<&str> = template.parameters.iter().map(|p| p.name.as_str()).collect();

    // Placeholders in the body must be declared as parameters.
    let placeholders = template.body.placeholders();
    for placeholder in &placeholders {
        if !parameter_names.contains(&placeholder.as_str()) {
            report.error(
                id,
                format!("placeholder '{placeholder}' has no parameter definition"),
            );
        }
    }
    for name in &parameter_names {
        if !placeholders.contains(*name) {
            report.warning(id, format!("parameter '{name}' is not used in the body"));
        }
    }

    // Conditional blocks: flat, paired, and conditioned on declared parameters.
    let conditional_parameters = match &template.body {
        TemplateBody::Sql { sql } => match parse_conditional_blocks(sql) {
            Ok(blocks) => blocks.into_iter().map(|b| b.parameter).collect(),
            Err(e) => {
                report.error(id, e.to_string());
                Vec::new()
            },
        },
        TemplateBody::Graphql { .. } | TemplateBody::Http { .. } => Vec::new(),
    };
    for parameter in &conditional_parameters {
        if !parameter_names.contains(&parameter.as_str()) {
            report.error(
                id,
                format!("conditional block references undeclared parameter '{parameter}'"),
            );
        }
    }

    if let TemplateBody::Graphql { document, .. } = &template.body {
        let declared = declared_graphql_variables(document);
        for parameter in &template.parameters {
            if !declared.contains(&parameter.name) {
                report.warning(
                    id,
                    format!(
                        "parameter '{}' is not declared in the GraphQL signature",
                        parameter.name
                    ),
                );
            }
            if parameter.required
                && parameter
                    .graphql_type
                    .as_deref()
                    .is_some_and(|t| !t.contains('!'))
            {
                report.warning(
                    id,
                    format!(
                        "required parameter '{}' doesn't have ! in graphql_type",
                        parameter.name
                    ),
                );
            }
        }
    }

    for parameter in &template.parameters {
        if parameter.required && parameter.default.is_some() {
            report.error(
                id,
                format!("required parameter '{}' must not declare a default", parameter.name),
            );
        }

        if !parameter.required && parameter.default.is_none() {
            let guarded = conditional_parameters.contains(&parameter.name);
            let message = format!(
                "optional parameter '{}' has no default and no conditional guard",
                parameter.name
            );
            if matches!(template.body, TemplateBody::Sql { .. }) && !guarded {
                report.error(id, message);
            } else if !matches!(template.body, TemplateBody::Sql { .. }) {
                report.warning(id, message);
            }
        }

        if let Some(regex_text) = &parameter.validation_regex
            && regex::Regex::new(regex_text).is_err()
        {
            report.error(
                id,
                format!("parameter '{}' has an invalid validation regex", parameter.name),
            );
        }

        // Parameter enum values must agree with the field they reference.
        if let Ok(resolved) = domain.resolve_field(&parameter.name) {
            if !resolved.field.enum_values.is_empty() && !parameter.enum_values.is_empty() {
                let field_set: Vec<String> = resolved
                    .field
                    .enum_values
                    .iter()
                    .map(|v| v.to_lowercase())
                    .collect();
                for value in &parameter.enum_values {
                    if !field_set.contains(&value.to_lowercase()) {
                        report.error(
                            id,
                            format!(
                                "parameter '{}' enum value '{value}' is not allowed by field '{}'",
                                parameter.name, resolved.name
                            ),
                        );
                    }
                }
            }
        } else if !domain.is_semantic_type(&parameter.name) {
            report.warning(
                id,
                format!(
                    "parameter '{}' resolves to no field or semantic type",
                    parameter.name
                ),
            );
        }
    }

    if let Some(tags) = &template.semantic_tags {
        if tags.action.is_none() {
            report.warning(id, "semantic_tags missing 'action'");
        }
        if tags.primary_entity.is_none() {
            report.warning(id, "semantic_tags missing 'primary_entity'");
        }
    }

    if matches!(
        template.body,
        TemplateBody::Graphql { .. } | TemplateBody::Http { .. }
    ) && template
        .response_mapping
        .as_ref()
        .is_none_or(|mapping| mapping.items_path.is_empty())
    {
        report.warning(id, "response_mapping missing 'items_path'");
    }
}
