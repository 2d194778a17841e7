//! Data models for the retrieval engine.
//!
//! This module contains all the core data structures used throughout the
//! system: the domain configuration, templates, and per-request types.

mod domain;
mod retrieval;
mod template;

pub use domain::{
    DataType, DomainConfig, DomainType, EntityDef, EntityType, FieldDef, NormalizedQuery,
    RelationType, RelationshipDef, ResolvedField, SemanticTypeDef, Vocabulary,
};
pub use retrieval::{
    CandidateMatch, ContextMetadata, ExecutionResult, ExtractedParameters, ExtractionStatus,
    RetrievalContextItem, RetrieveOptions,
};
pub use template::{
    ConditionalBlock, GraphqlOperation, HttpLocation, RawTemplate, ResponseMapping, ResultFormat,
    SemanticTags, Template, TemplateBody, TemplateParameter, declared_graphql_variables,
    parse_conditional_blocks, render_conditionals, sql_placeholder_spans,
};
