// Copyright 2025 Mnemo Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Embedding providers

use crate::error::{IndexError, IndexResult};
use crate::vector::l2_normalize;
use async_trait::async_trait;

/// Produces embedding vectors for memory content.
///
/// The consolidation engine only requires that identical text maps to
/// identical vectors and that the dimension is fixed; any model-backed
/// provider can be plugged in behind this trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// Deterministic embedding provider based on token hashing.
///
/// Tokens are lowercased, hashed into a fixed number of buckets, and the
/// resulting bag-of-words vector is L2-normalized. Identical content always
/// produces the identical vector (cosine similarity exactly 1.0), which is
/// what exact-duplicate detection relies on. Texts sharing most of their
/// tokens land close together; unrelated texts land far apart.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> IndexResult<Vec<f32>> {
        if self.dimension == 0 {
            return Err(IndexError::Embedding(
                "embedding dimension must be non-zero".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.as_bytes()) as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a, 64-bit. Stable across platforms and releases, unlike
/// `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
