//! Hash-based fallback embedder.

// Cast precision loss is acceptable for hash-derived pseudo-embedding values.
#![allow(clippy::cast_precision_loss)]
// Hash bucket indices are reduced modulo the dimension count.
#![allow(clippy::cast_possible_truncation)]

use super::Embedder;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic pseudo-embedder.
///
/// Buckets token hashes into a fixed-size vector and L2-normalizes. The
/// result carries token-overlap signal only, which is enough for development
/// and tests where a real embedding service is not available. Identical text
/// always produces an identical vector.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Default dimensionality when none is configured.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Creates a new hash embedder.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions.max(1)];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % vector.len();
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}
