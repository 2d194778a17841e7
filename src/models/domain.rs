//! Domain configuration types.
//!
//! A domain document declaratively describes one target domain: its entities,
//! fields, relationships, vocabulary, and semantic types. The engine uses it to
//! resolve parameter names, rewrite query phrasing, detect time windows, and
//! pick display formats for results.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Datasource kind a domain targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    /// Relational datasource queried with SQL.
    #[default]
    Sql,
    /// GraphQL endpoint.
    Graphql,
    /// REST-style HTTP API.
    Http,
}

impl DomainType {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Graphql => "graphql",
            Self::Http => "http",
        }
    }
}

/// Role an entity plays within the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Main business object (e.g., customer).
    #[default]
    Primary,
    /// Transactional records (e.g., orders).
    Transaction,
    /// Reference data joined for display.
    Reference,
    /// Small lookup/enumeration tables.
    Lookup,
}

/// Declared data type of a field or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Free-form text.
    #[default]
    String,
    /// Whole number.
    Integer,
    /// Fractional number.
    Decimal,
    /// Calendar date (ISO-8601 `YYYY-MM-DD`).
    Date,
    /// Date and time (ISO-8601).
    Datetime,
    /// Boolean literal.
    Boolean,
    /// One of a fixed set of string values.
    Enum,
}

impl DataType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Boolean => "boolean",
            Self::Enum => "enum",
        }
    }
}

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// One row on each side.
    OneToOne,
    /// One parent row, many child rows.
    OneToMany,
    /// Many rows on both sides.
    ManyToMany,
}

/// An entity declared by the domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityDef {
    /// Role of the entity within the domain.
    #[serde(default)]
    pub entity_type: EntityType,
    /// Physical table name, endpoint, or GraphQL type.
    pub physical_name: String,
    /// Primary key field name.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Field used when displaying the entity.
    #[serde(default)]
    pub display_name_field: Option<String>,
    /// Fields exposed to text search.
    #[serde(default)]
    pub searchable_fields: Vec<String>,
    /// Filters commonly applied to this entity.
    #[serde(default)]
    pub common_filters: Vec<String>,
    /// Default sort field for listings.
    #[serde(default)]
    pub default_sort_field: Option<String>,
}

/// A field declared by the domain, keyed under its entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDef {
    /// Declared data type.
    #[serde(default)]
    pub data_type: DataType,
    /// Physical column or attribute name.
    #[serde(default)]
    pub physical_column: Option<String>,
    /// Whether the field is required on its entity.
    #[serde(default)]
    pub required: bool,
    /// Whether the field participates in text search.
    #[serde(default)]
    pub searchable: bool,
    /// Whether the field can be filtered on.
    #[serde(default)]
    pub filterable: bool,
    /// Whether the field can be sorted on.
    #[serde(default)]
    pub sortable: bool,
    /// Display format applied by the result formatter
    /// (e.g., `currency`, `phone`, `percentage`, `date`).
    #[serde(default)]
    pub display_format: Option<String>,
    /// Allowed values when `data_type` is `enum`.
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Alternative names the field is known by.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Relationship name.
    pub name: String,
    /// Source entity.
    pub from_entity: String,
    /// Target entity.
    pub to_entity: String,
    /// Cardinality.
    pub relation_type: RelationType,
    /// Joining field on the source entity.
    pub from_field: String,
    /// Joining field on the target entity.
    pub to_field: String,
}

/// Domain vocabulary: synonyms, verbs, time expressions, and phrase rewrites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Entity name → synonyms.
    #[serde(default)]
    pub entity_synonyms: HashMap<String, Vec<String>>,
    /// Action → verb synonyms.
    #[serde(default)]
    pub action_verbs: HashMap<String, Vec<String>>,
    /// Informal field name → canonical field name.
    #[serde(default)]
    pub field_synonyms: HashMap<String, String>,
    /// Time phrase → days back (e.g., "last week" → 7).
    #[serde(default)]
    pub time_expressions: HashMap<String, i64>,
    /// Common phrase → canonical rewrite.
    #[serde(default)]
    pub common_phrases: HashMap<String, String>,
}

/// A named semantic type recognized by the domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticTypeDef {
    /// Human description of the type.
    #[serde(default)]
    pub description: String,
    /// Literal patterns a value of this type may match.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Regex patterns a value of this type may match.
    #[serde(default)]
    pub regex_patterns: Vec<String>,
}

impl SemanticTypeDef {
    /// Returns true if the value matches one of the declared patterns.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let lowered = value.to_lowercase();
        if self.patterns.iter().any(|p| p.to_lowercase() == lowered) {
            return true;
        }
        self.regex_patterns
            .iter()
            .filter_map(|p| regex::Regex::new(p).ok())
            .any(|re| re.is_match(value))
    }
}

/// A field resolved through [`DomainConfig::resolve_field`].
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField<'a> {
    /// Entity the field belongs to.
    pub entity: &'a str,
    /// Canonical field name.
    pub name: &'a str,
    /// The field definition.
    pub field: &'a FieldDef,
}

/// Result of vocabulary normalization over a query.
#[derive(Debug, Clone)]
pub struct NormalizedQuery {
    /// The rewritten query text.
    pub text: String,
    /// Entity names mentioned in the query.
    pub entities: BTreeSet<String>,
}

/// Declarative description of one target domain.
///
/// Immutable after load; reloads construct a fresh value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain name (e.g., "ecommerce").
    pub domain_name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Datasource kind the domain targets.
    #[serde(default)]
    pub domain_type: DomainType,
    /// Entities by name.
    #[serde(default)]
    pub entities: HashMap<String, EntityDef>,
    /// Fields by entity name, then field name.
    #[serde(default)]
    pub fields: HashMap<String, HashMap<String, FieldDef>>,
    /// Relationships in document order.
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    /// Vocabulary used for query normalization and enrichment.
    #[serde(default)]
    pub vocabulary: Vocabulary,
    /// Semantic types by name.
    #[serde(default)]
    pub semantic_types: HashMap<String, SemanticTypeDef>,
}

impl DomainConfig {
    /// Resolves a name to a field from any entity, checking canonical names
    /// first, then per-field aliases, then domain-level field synonyms.
    ///
    /// Ambiguity across entities resolves deterministically by entity name
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when no field or alias matches.
    pub fn resolve_field(&self, name: &str) -> Result<ResolvedField<'_>> {
        let lowered = name.to_lowercase();

        let mut entity_names: Vec<&String> = self.fields.keys().collect();
        entity_names.sort();

        // Canonical names take precedence over aliases.
        for entity in &entity_names {
            if let Some((field_name, field)) = self.fields[entity.as_str()]
                .iter()
                .find(|(field_name, _)| field_name.to_lowercase() == lowered)
            {
                return Ok(ResolvedField {
                    entity: entity.as_str(),
                    name: field_name.as_str(),
                    field,
                });
            }
        }

        for entity in &entity_names {
            let fields = &self.fields[entity.as_str()];
            let mut field_names: Vec<&String> = fields.keys().collect();
            field_names.sort();
            for field_name in field_names {
                let field = &fields[field_name.as_str()];
                if field.aliases.iter().any(|a| a.to_lowercase() == lowered) {
                    return Ok(ResolvedField {
                        entity: entity.as_str(),
                        name: field_name.as_str(),
                        field,
                    });
                }
            }
        }

        if let Some(canonical) = self
            .vocabulary
            .field_synonyms
            .iter()
            .find(|(synonym, _)| synonym.to_lowercase() == lowered)
            .map(|(_, canonical)| canonical.clone())
        {
            // A synonym pointing at itself would recurse forever.
            if canonical.to_lowercase() != lowered {
                return self.resolve_field(&canonical);
            }
        }

        Err(Error::InvalidInput(format!("unknown field: {name}")))
    }

    /// Returns true if the name is a declared semantic type.
    #[must_use]
    pub fn is_semantic_type(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.semantic_types
            .keys()
            .any(|k| k.to_lowercase() == lowered)
    }

    /// Rewrites common phrases (longest phrase first, case-insensitive) and
    /// reports which entities the query mentions.
    #[must_use]
    pub fn normalize_vocabulary(&self, text: &str) -> NormalizedQuery {
        let mut rewritten = text.to_string();

        let mut phrases: Vec<(&String, &String)> = self.vocabulary.common_phrases.iter().collect();
        phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        for (phrase, replacement) in phrases {
            rewritten = replace_case_insensitive(&rewritten, phrase, replacement);
        }

        let lowered = rewritten.to_lowercase();
        let mut entities = BTreeSet::new();
        for (entity, synonyms) in &self.vocabulary.entity_synonyms {
            let mentioned = std::iter::once(entity.as_str())
                .chain(synonyms.iter().map(String::as_str))
                .any(|term| contains_word(&lowered, &term.to_lowercase()));
            if mentioned {
                entities.insert(entity.clone());
            }
        }
        // Entity names themselves count as mentions even without synonyms.
        for entity in self.entities.keys() {
            if contains_word(&lowered, &entity.to_lowercase()) {
                entities.insert(entity.clone());
            }
        }

        NormalizedQuery {
            text: rewritten,
            entities,
        }
    }

    /// Looks up a time phrase (case-insensitive) and returns its days-back value.
    #[must_use]
    pub fn time_phrase_to_days(&self, phrase: &str) -> Option<i64> {
        let lowered = phrase.to_lowercase();
        self.vocabulary
            .time_expressions
            .iter()
            .find(|(expr, _)| expr.to_lowercase() == lowered)
            .map(|(_, days)| *days)
    }

    /// Scans free text for the first recognized time expression.
    ///
    /// Returns the matched phrase and its days-back value. Longer phrases win
    /// so "last three months" beats "last month" when both are declared.
    #[must_use]
    pub fn find_time_expression(&self, text: &str) -> Option<(String, i64)> {
        let lowered = text.to_lowercase();
        let mut expressions: Vec<(&String, &i64)> =
            self.vocabulary.time_expressions.iter().collect();
        expressions.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        expressions
            .into_iter()
            .find(|(expr, _)| lowered.contains(&expr.to_lowercase()))
            .map(|(expr, days)| (expr.clone(), *days))
    }

    /// Returns the display format declared for a field name, if any.
    #[must_use]
    pub fn display_format_for(&self, field_name: &str) -> Option<&str> {
        self.resolve_field(field_name)
            .ok()
            .and_then(|resolved| resolved.field.display_format.as_deref())
    }
}

/// Replaces all case-insensitive occurrences of `from` with `to`.
fn replace_case_insensitive(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }
    let lowered_text = text.to_lowercase();
    let lowered_from = from.to_lowercase();
    // Lowercasing must be length-preserving for index math below; fall back to
    // exact replacement for scripts where it is not.
    if lowered_text.len() != text.len() || lowered_from.len() != from.len() {
        return text.replace(from, to);
    }

    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(pos) = lowered_text[cursor..].find(&lowered_from) {
        let start = cursor + pos;
        result.push_str(&text[cursor..start]);
        result.push_str(to);
        cursor = start + from.len();
    }
    result.push_str(&text[cursor..]);
    result
}

/// Word-boundary containment check over lowercase text.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut search_from = 0;
    while let Some(pos) = haystack[search_from..].find(needle) {
        let start = search_from + pos;
        let end = start + needle.len();
        let boundary_before = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let boundary_after = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(char::is_alphanumeric);
        if boundary_before && boundary_after {
            return true;
        }
        search_from = end;
    }
    false
}
