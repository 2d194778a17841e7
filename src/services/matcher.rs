//! Template matching against the vector store.
//!
//! The matcher owns the embedding-text convention: every template is reduced
//! to one canonical string, embedded once, and reconciled into the store under
//! its content hash. Per request it embeds the query, searches the store, and
//! maps ids back into ranked candidates.

use crate::embedding::Embedder;
use crate::models::{CandidateMatch, Template};
use crate::services::TemplateLibrary;
use crate::store::{TemplateRecordMeta, VectorStore};
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Templates embedded and inserted for the first time.
    pub added: usize,
    /// Templates re-embedded because their content hash changed.
    pub updated: usize,
    /// Stored records deleted because the template disappeared.
    pub deleted: usize,
    /// Templates left untouched.
    pub unchanged: usize,
}

/// Outcome of one candidate search.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Candidates at or above the threshold, ordered by descending similarity.
    pub candidates: Vec<CandidateMatch>,
    /// Highest similarity observed before threshold filtering.
    pub best_similarity: f32,
}

/// Turns queries into ranked candidate templates.
pub struct TemplateMatcher {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    embed_timeout: Duration,
    store_timeout: Duration,
}

impl TemplateMatcher {
    /// Creates a matcher over the given capabilities.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        embed_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            embed_timeout,
            store_timeout,
        }
    }

    /// Composes the canonical embedding text for a template.
    ///
    /// The concatenation order is fixed (description, examples, tags,
    /// parameter names with underscores spaced, then flattened semantic tags)
    /// so the same template always produces byte-identical text and a stable
    /// content hash.
    #[must_use]
    pub fn build_embedding_text(template: &Template) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !template.description.is_empty() {
            parts.push(template.description.clone());
        }
        for example in &template.nl_examples {
            parts.push(example.clone());
        }
        for tag in &template.tags {
            parts.push(tag.clone());
        }
        for parameter in &template.parameters {
            parts.push(parameter.name.replace('_', " "));
        }
        if let Some(tags) = &template.semantic_tags {
            if let Some(action) = &tags.action {
                parts.push(action.clone());
            }
            if let Some(entity) = &tags.primary_entity {
                parts.push(entity.clone());
            }
            if let Some(entity) = &tags.secondary_entity {
                parts.push(entity.clone());
            }
            for qualifier in &tags.qualifiers {
                parts.push(qualifier.clone());
            }
        }

        parts.join(" ")
    }

    /// Computes the content hash used for diff-based reconciliation.
    ///
    /// Covers the embedding text, the body, and the version, so any change
    /// that should re-embed or re-describe the template changes the hash.
    #[must_use]
    pub fn content_hash(template: &Template) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::build_embedding_text(template).as_bytes());
        hasher.update(b"\n");
        hasher.update(template.body.hash_text().as_bytes());
        hasher.update(b"\n");
        hasher.update(template.version.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Reconciles the vector store with the library.
    ///
    /// Fetches stored ids and hashes, then upserts new and changed templates
    /// and deletes records whose template disappeared. With `force`, clears
    /// the store and rebuilds from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error when the store or embedder is unavailable.
    pub async fn sync(&self, library: &TemplateLibrary, force: bool) -> Result<SyncReport> {
        self.store_call(self.store.ensure_ready(self.embedder.dimensions()))
            .await?;

        if force {
            self.store_call(self.store.clear()).await?;
        }

        let existing = self.store_call(self.store.get_all_records()).await?;
        let mut report = SyncReport::default();

        for template in library.all_templates() {
            let hash = Self::content_hash(&template);
            match existing.get(&template.id) {
                Some(record) if record.content_hash == hash => {
                    report.unchanged += 1;
                    continue;
                },
                Some(_) => report.updated += 1,
                None => report.added += 1,
            }

            let text = Self::build_embedding_text(&template);
            let embedding = self.embed(&text).await?;
            let meta = TemplateRecordMeta {
                content_hash: hash,
                version: template.version.clone(),
            };
            self.store_call(self.store.upsert(&template.id, &embedding, &meta))
                .await?;
        }

        for id in existing.keys() {
            if library.get(id).is_none() {
                self.store_call(self.store.delete(id)).await?;
                report.deleted += 1;
            }
        }

        tracing::info!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            "Template vector store reconciled"
        );
        Ok(report)
    }

    /// Finds the best candidate templates for a query.
    ///
    /// Embeds the query, searches the store for `k` neighbors, drops
    /// candidates below `threshold`, and returns the rest ordered by
    /// descending similarity. A similarity exactly at the threshold counts as
    /// a match.
    ///
    /// # Errors
    ///
    /// Returns an error when the store or embedder is unavailable.
    pub async fn find_best(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
        library: &TemplateLibrary,
    ) -> Result<MatchResult> {
        let embedding = self.embed(query).await?;
        let neighbors = self
            .store_call(self.store.query(&embedding, k))
            .await?;

        let mut best_similarity = 0.0f32;
        let mut candidates: Vec<CandidateMatch> = neighbors
            .into_iter()
            .filter_map(|(id, distance)| {
                let Some(template) = library.get(&id) else {
                    tracing::warn!(
                        template_id = %id,
                        "Vector store returned an id missing from the library"
                    );
                    return None;
                };
                let similarity = (1.0 - distance).clamp(0.0, 1.0);
                best_similarity = best_similarity.max(similarity);
                Some((template, similarity))
            })
            .filter(|(_, similarity)| *similarity >= threshold)
            .map(|(template, similarity)| CandidateMatch {
                template,
                similarity,
                rank: 0,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (rank, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = rank;
        }
        Ok(MatchResult {
            candidates,
            best_similarity,
        })
    }

    /// Embeds text with the configured timeout.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::timeout(self.embed_timeout, self.embedder.embed_query(text))
            .await
            .map_err(|_| {
                Error::EmbedderUnavailable(format!(
                    "embedding timed out after {}ms",
                    self.embed_timeout.as_millis()
                ))
            })?
    }

    /// Runs a store operation with the configured timeout.
    async fn store_call<T>(
        &self,
        operation: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| {
                Error::VectorStoreUnavailable(format!(
                    "vector store timed out after {}ms",
                    self.store_timeout.as_millis()
                ))
            })?
    }
}
