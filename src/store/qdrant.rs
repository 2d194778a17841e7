//! Qdrant vector store (REST).

use super::{TemplateRecordMeta, VectorStore};
use crate::config::VectorStoreConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Qdrant-backed vector store.
///
/// Points are keyed by a numeric id derived from the template id; the template
/// id, content hash, and version live in the point payload. The collection is
/// created with cosine distance, and Qdrant's returned score (a cosine
/// similarity) is mapped back to `1 − score` so callers see one distance
/// convention.
pub struct QdrantVectorStore {
    url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantVectorStore {
    /// Default Qdrant URL.
    pub const DEFAULT_URL: &'static str = "http://localhost:6333";

    /// Creates a store from configuration.
    #[must_use]
    pub fn from_config(config: &VectorStoreConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }
        let client = builder.build().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to build Qdrant HTTP client, using defaults");
            reqwest::Client::new()
        });

        Self {
            url: config
                .url
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_URL.to_string()),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
            client,
        }
    }

    /// Derives the stable numeric point id for a template id.
    #[must_use]
    pub fn point_id(template_id: &str) -> u64 {
        let digest = Sha256::digest(template_id.as_bytes());
        u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ])
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.url.trim_end_matches('/')));
        if let Some(api_key) = &self.api_key {
            builder = builder.header("api-key", api_key);
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<serde_json::Value> {
        let response = builder.send().await.map_err(|e| {
            tracing::error!(store = "qdrant", operation, error = %e, "Vector store request failed");
            Error::VectorStoreUnavailable(format!("{operation}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                store = "qdrant",
                operation,
                status = %status,
                body = %body,
                "Vector store returned error status"
            );
            return Err(Error::VectorStoreUnavailable(format!(
                "{operation}: status {status} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::VectorStoreUnavailable(format!("{operation}: invalid body: {e}")))
    }

    fn meta_from_payload(payload: &serde_json::Value) -> TemplateRecordMeta {
        TemplateRecordMeta {
            content_hash: payload
                .get("content_hash")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            version: payload
                .get("version")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        }
    }
}

#[derive(Deserialize)]
struct ScrollResult {
    result: ScrollPage,
}

#[derive(Deserialize)]
struct ScrollPage {
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    #[serde(default)]
    payload: serde_json::Value,
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn ensure_ready(&self, dimensions: usize) -> Result<()> {
        let exists = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/collections/{}/exists", self.collection),
                ),
                "collection_exists",
            )
            .await?;
        let already = exists
            .pointer("/result/exists")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if already {
            return Ok(());
        }

        tracing::info!(
            store = "qdrant",
            collection = %self.collection,
            dimensions,
            "Creating vector store collection"
        );
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            })),
            "create_collection",
        )
        .await?;
        Ok(())
    }

    async fn upsert(&self, id: &str, embedding: &[f32], meta: &TemplateRecordMeta) -> Result<()> {
        let point = json!({
            "points": [{
                "id": Self::point_id(id),
                "vector": embedding,
                "payload": {
                    "template_id": id,
                    "content_hash": meta.content_hash,
                    "version": meta.version,
                },
            }]
        });
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&point),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&json!({ "points": [Self::point_id(id)] })),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let body = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/search", self.collection),
                )
                .json(&json!({
                    "vector": embedding,
                    "limit": k,
                    "with_payload": true,
                })),
                "search",
            )
            .await?;

        let hits = body
            .get("result")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(template_id) = hit
                .pointer("/payload/template_id")
                .and_then(serde_json::Value::as_str)
            else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let score = hit
                .get("score")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0) as f32;
            // Qdrant reports cosine similarity; convert to distance.
            results.push((template_id.to_string(), 1.0 - score));
        }
        Ok(results)
    }

    async fn get_all_records(&self) -> Result<HashMap<String, TemplateRecordMeta>> {
        let mut records = HashMap::new();
        let mut offset: Option<serde_json::Value> = None;

        loop {
            let mut request = json!({
                "limit": 256,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(offset_value) = &offset {
                request["offset"] = offset_value.clone();
            }

            let body = self
                .send(
                    self.request(
                        reqwest::Method::POST,
                        &format!("/collections/{}/points/scroll", self.collection),
                    )
                    .json(&request),
                    "scroll",
                )
                .await?;

            let page: ScrollResult = serde_json::from_value(body).map_err(|e| {
                Error::VectorStoreUnavailable(format!("scroll: invalid body: {e}"))
            })?;

            for point in page.result.points {
                if let Some(template_id) = point
                    .payload
                    .get("template_id")
                    .and_then(serde_json::Value::as_str)
                {
                    records.insert(
                        template_id.to_string(),
                        Self::meta_from_payload(&point.payload),
                    );
                }
            }

            match page.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn clear(&self) -> Result<()> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&json!({ "filter": {} })),
            "clear",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_stable() {
        let a = QdrantVectorStore::point_id("find_customer");
        let b = QdrantVectorStore::point_id("find_customer");
        assert_eq!(a, b);
        assert_ne!(a, QdrantVectorStore::point_id("recent_orders"));
    }

    #[test]
    fn test_meta_from_payload() {
        let payload = json!({
            "template_id": "find_customer",
            "content_hash": "abc123",
            "version": "1.2.0",
        });
        let meta = QdrantVectorStore::meta_from_payload(&payload);
        assert_eq!(meta.content_hash, "abc123");
        assert_eq!(meta.version.as_deref(), Some("1.2.0"));
    }
}
