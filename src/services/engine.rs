//! Retrieval engine orchestration.
//!
//! One async entry point, [`RetrievalEngine::retrieve_context`], runs the
//! pipeline: match → extract → execute → format. The engine never raises into
//! the caller's control flow; every failure comes back as a context item
//! carrying an error kind in its metadata.

use crate::config::EngineConfig;
use crate::datasource::Datasource;
use crate::embedding::Embedder;
use crate::llm::{GenerateOptions, LlmProvider};
use crate::models::{
    ContextMetadata, DomainConfig, ExtractionStatus, RetrievalContextItem, RetrieveOptions,
};
use crate::services::{
    ParameterExtractor, ResultFormatter, SyncReport, TemplateExecutor, TemplateLibrary,
    TemplateMatcher, ValidationReport, loader,
};
use crate::store::VectorStore;
use crate::{Error, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Immutable per-load engine state.
///
/// Reloads build a new state and atomically swap the reference; in-flight
/// requests keep the state they started with.
struct EngineState {
    domain: DomainConfig,
    library: TemplateLibrary,
}

impl EngineState {
    fn empty() -> Self {
        Self {
            domain: DomainConfig::default(),
            library: TemplateLibrary::empty(),
        }
    }
}

/// The intent-driven template retrieval engine.
pub struct RetrievalEngine {
    config: EngineConfig,
    state: RwLock<Arc<EngineState>>,
    matcher: TemplateMatcher,
    extractor: ParameterExtractor,
    executor: TemplateExecutor,
    formatter: ResultFormatter,
}

impl RetrievalEngine {
    /// Builds an engine with capabilities selected by configuration.
    ///
    /// The engine starts with an empty library; call
    /// [`initialize`](Self::initialize) before serving requests.
    ///
    /// # Errors
    ///
    /// Returns an error when a capability factory rejects its configuration.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let embedder = crate::embedding::from_config(&config.embedding)?;
        let store = crate::store::from_config(&config.vector_store)?;
        let llm = crate::llm::from_config(&config.llm)?;
        let datasource = crate::datasource::from_config(&config.datasource)?;
        Ok(Self::with_capabilities(
            config, embedder, store, llm, datasource,
        ))
    }

    /// Builds an engine over explicit capability handles.
    #[must_use]
    pub fn with_capabilities(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        datasource: Arc<dyn Datasource>,
    ) -> Self {
        let matcher = TemplateMatcher::new(
            embedder,
            store,
            Duration::from_millis(config.embedding.timeout_ms),
            Duration::from_millis(config.vector_store.timeout_ms),
        );
        let extractor = ParameterExtractor::new(
            llm,
            GenerateOptions::from_config(&config.llm),
            Duration::from_millis(config.llm.timeout_ms),
        );
        let executor = TemplateExecutor::new(
            datasource,
            Duration::from_millis(config.datasource.timeout_ms),
            config.engine.require_approved,
        );

        Self {
            config,
            state: RwLock::new(Arc::new(EngineState::empty())),
            matcher,
            extractor,
            executor,
            formatter: ResultFormatter::new(),
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads documents and reconciles the vector store.
    ///
    /// In strict mode a failure blocks startup; in lenient mode the engine
    /// degrades to an empty library and serves zero-confidence items.
    ///
    /// # Errors
    ///
    /// Returns an error in strict mode when documents cannot be loaded or a
    /// capability is unavailable.
    pub async fn initialize(&self) -> Result<()> {
        match self.reload().await {
            Ok(_) => Ok(()),
            Err(e) if !self.config.engine.strict_startup => {
                tracing::warn!(
                    error = %e,
                    "Startup degraded to an empty template library"
                );
                self.swap_state(EngineState::empty());
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Reloads the domain and template documents and swaps them in.
    ///
    /// In-flight requests continue against the previous library until they
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns an error when documents cannot be loaded or reconciliation
    /// fails.
    pub async fn reload(&self) -> Result<SyncReport> {
        let domain = loader::load_domain(&self.config.engine.domain_config_path)?;
        let raw_templates = loader::load_templates(&self.config.engine.template_library_path)?;
        let (library, report) = TemplateLibrary::from_raw(raw_templates, &domain);
        log_validation(&report);

        tracing::info!(
            templates = library.len(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Template library loaded"
        );

        let sync_report = if self.config.engine.reload_templates_on_start {
            self.matcher
                .sync(&library, self.config.engine.force_reload_templates)
                .await?
        } else {
            SyncReport::default()
        };

        self.swap_state(EngineState { domain, library });
        Ok(sync_report)
    }

    /// Runs vector-store reconciliation against the current library.
    ///
    /// # Errors
    ///
    /// Returns an error when the store or embedder is unavailable.
    pub async fn sync(&self, force: bool) -> Result<SyncReport> {
        let state = self.current_state();
        self.matcher.sync(&state.library, force).await
    }

    /// Validates the currently loaded library against the domain.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let state = self.current_state();
        state.library.validate(&state.domain)
    }

    /// Retrieves context for a natural-language query.
    ///
    /// Always returns a list; failures come back as a single zero-confidence
    /// item whose metadata names the error kind.
    pub async fn retrieve_context(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Vec<RetrievalContextItem> {
        if query.trim().is_empty() {
            return vec![RetrievalContextItem::error_item(
                "The query is empty.",
                "invalid_input",
                Some("query must not be blank".to_string()),
            )];
        }

        let state = self.current_state();
        let k = options.max_results.unwrap_or(self.config.engine.max_templates);
        let threshold = options
            .confidence_threshold
            .unwrap_or(self.config.engine.confidence_threshold);

        if state.library.is_empty() {
            return vec![no_match_item(0.0, threshold, "template library is empty")];
        }

        let matches = match self
            .matcher
            .find_best(query, k, threshold, &state.library)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!(error = %e, "Candidate search failed");
                return vec![RetrievalContextItem::error_item(
                    "Retrieval is currently unavailable.",
                    e.kind(),
                    Some(e.to_string()),
                )];
            },
        };

        if matches.candidates.is_empty() {
            return vec![no_match_item(
                matches.best_similarity,
                threshold,
                "no candidate at or above the confidence threshold",
            )];
        }

        if options.trace {
            for candidate in &matches.candidates {
                tracing::info!(
                    template_id = %candidate.template.id,
                    similarity = candidate.similarity,
                    rank = candidate.rank,
                    "Candidate template"
                );
            }
        }

        // Candidates are tried strictly in descending-similarity order.
        let mut last_failure: Option<String> = None;
        for candidate in &matches.candidates {
            let template = &candidate.template;
            let extraction = self
                .extractor
                .extract(query, template, &state.domain)
                .await;

            if !extraction.status.is_ok() {
                tracing::info!(
                    template_id = %template.id,
                    status = extraction.status.as_str(),
                    "Parameter extraction failed, trying next candidate"
                );
                last_failure = Some(describe_status(&template.id, &extraction.status));
                continue;
            }

            match self.executor.execute(template, &extraction).await {
                Ok(result) => {
                    return self.formatter.format(
                        &state.domain,
                        template,
                        candidate.similarity,
                        &extraction,
                        &result,
                    );
                },
                Err(e @ Error::RenderingFailed { .. }) => {
                    // A rendering failure is a library bug for this template.
                    tracing::error!(
                        template_id = %template.id,
                        error = %e,
                        "Template rendering failed, trying next candidate"
                    );
                    last_failure = Some(e.to_string());
                },
                Err(e) => {
                    // Datasource failures surface with the template identity;
                    // no fallback.
                    return vec![RetrievalContextItem {
                        content: "Query execution failed.".to_string(),
                        confidence: 0.0,
                        metadata: ContextMetadata {
                            template_id: Some(template.id.clone()),
                            parameters_used: extraction.values.clone(),
                            result_count: 0,
                            error: Some(e.kind().to_string()),
                            detail: Some(e.to_string()),
                            source_kind: Some(template.body.source_kind().to_string()),
                        },
                    }];
                },
            }
        }

        vec![RetrievalContextItem::error_item(
            "Could not extract the required parameters for this query.",
            "parameter_extraction_failed",
            last_failure,
        )]
    }

    fn current_state(&self) -> Arc<EngineState> {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap_state(&self, next: EngineState) {
        let next = Arc::new(next);
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

fn no_match_item(best_similarity: f32, threshold: f32, reason: &str) -> RetrievalContextItem {
    RetrievalContextItem::error_item(
        "No matching template found for this query.",
        "no_matching_template",
        Some(format!(
            "{reason} (best similarity {best_similarity:.3}, threshold {threshold:.3})"
        )),
    )
}

fn describe_status(template_id: &str, status: &ExtractionStatus) -> String {
    match status {
        ExtractionStatus::Ok => format!("template '{template_id}': ok"),
        ExtractionStatus::MissingRequired { parameter } => {
            format!("template '{template_id}': required parameter '{parameter}' missing")
        },
        ExtractionStatus::TypeError { parameter, detail } => {
            format!("template '{template_id}': parameter '{parameter}': {detail}")
        },
        ExtractionStatus::LlmParseError { detail } => {
            format!("template '{template_id}': {detail}")
        },
    }
}

fn log_validation(report: &ValidationReport) {
    for issue in &report.errors {
        tracing::error!(template_id = %issue.template_id, "{}", issue.message);
    }
    for issue in &report.warnings {
        tracing::warn!(template_id = %issue.template_id, "{}", issue.message);
    }
}
