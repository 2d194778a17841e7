//! In-process vector store.

use super::{TemplateRecordMeta, VectorStore};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory vector store.
///
/// Holds embeddings in a map and scans on query. Suitable for development,
/// tests, and small template libraries; a production deployment points the
/// engine at an external store instead.
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

struct StoredRecord {
    embedding: Vec<f32>,
    meta: TemplateRecordMeta,
}

impl MemoryVectorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Returns true when the store holds no records.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, StoredRecord>>> {
        self.records
            .read()
            .map_err(|_| Error::VectorStoreUnavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, StoredRecord>>> {
        self.records
            .write()
            .map_err(|_| Error::VectorStoreUnavailable("store lock poisoned".to_string()))
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine distance between two vectors (`0` identical, `2` opposite).
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, id: &str, embedding: &[f32], meta: &TemplateRecordMeta) -> Result<()> {
        let mut records = self.write()?;
        records.insert(
            id.to_string(),
            StoredRecord {
                embedding: embedding.to_vec(),
                meta: meta.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.write()?;
        records.remove(id);
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let records = self.read()?;
        let mut scored: Vec<(String, f32)> = records
            .iter()
            .filter(|(_, record)| record.embedding.len() == embedding.len())
            .map(|(id, record)| (id.clone(), cosine_distance(embedding, &record.embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn get_all_records(&self) -> Result<HashMap<String, TemplateRecordMeta>> {
        let records = self.read()?;
        Ok(records
            .iter()
            .map(|(id, record)| (id.clone(), record.meta.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut records = self.write()?;
        records.clear();
        Ok(())
    }
}
