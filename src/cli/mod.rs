//! CLI command implementations.

// CLI commands write their results to stdout.
#![allow(clippy::print_stdout)]

use crate::config::EngineConfig;
use crate::models::RetrieveOptions;
use crate::services::{RetrievalEngine, TemplateLibrary, loader};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Intent-driven template retrieval engine.
#[derive(Debug, Parser)]
#[command(name = "orbit-intent", version, about)]
pub struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, default_value = "orbit-intent.toml", env = "ORBIT_INTENT_CONFIG")]
    pub config: PathBuf,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the domain and template documents.
    Validate,
    /// Reconcile the template vector store with the library.
    Sync {
        /// Rebuild the store from scratch.
        #[arg(long)]
        force: bool,
    },
    /// Run one retrieval and print the context items as JSON.
    Query {
        /// The natural-language query.
        text: String,
        /// Override the configured K for vector search.
        #[arg(long)]
        max_results: Option<usize>,
        /// Override the configured confidence threshold.
        #[arg(long)]
        threshold: Option<f32>,
        /// Emit per-step logs for this request.
        #[arg(long)]
        trace: bool,
    },
}

/// Runs the parsed CLI command.
///
/// # Errors
///
/// Returns an error when the command fails; `validate` fails when the
/// documents contain validation errors.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::load(&cli.config)?;
    crate::observability::init_logging(&config.logging);

    match cli.command {
        Command::Validate => validate(&config),
        Command::Sync { force } => sync(config, force).await,
        Command::Query {
            text,
            max_results,
            threshold,
            trace,
        } => {
            query(
                config,
                &text,
                RetrieveOptions {
                    max_results,
                    confidence_threshold: threshold,
                    trace,
                },
            )
            .await
        },
    }
}

fn validate(config: &EngineConfig) -> anyhow::Result<()> {
    let domain = loader::load_domain(&config.engine.domain_config_path)?;
    let raw_templates = loader::load_templates(&config.engine.template_library_path)?;
    let total = raw_templates.len();
    let (library, report) = TemplateLibrary::from_raw(raw_templates, &domain);

    for issue in &report.errors {
        println!("ERROR   {issue}");
    }
    for issue in &report.warnings {
        println!("WARNING {issue}");
    }
    println!(
        "{} of {total} template(s) valid, {} error(s), {} warning(s)",
        library.len(),
        report.errors.len(),
        report.warnings.len()
    );

    if report.is_valid() {
        Ok(())
    } else {
        anyhow::bail!("validation failed with {} error(s)", report.errors.len())
    }
}

async fn sync(mut config: EngineConfig, force: bool) -> anyhow::Result<()> {
    // reload() would reconcile a second time; this command owns the sync.
    config.engine.reload_templates_on_start = false;
    let engine = RetrievalEngine::from_config(config)?;
    engine.reload().await?;
    let report = engine.sync(force).await?;
    println!(
        "synced: {} added, {} updated, {} deleted, {} unchanged",
        report.added, report.updated, report.deleted, report.unchanged
    );
    Ok(())
}

async fn query(config: EngineConfig, text: &str, options: RetrieveOptions) -> anyhow::Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    engine.initialize().await?;
    let items = engine.retrieve_context(text, &options).await;
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
