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

//! Near-duplicate detection and merging.
//!
//! Detection embeds the snapshot, builds a fresh HNSW index for the run,
//! and connects memories whose similarity clears the threshold. Groups are
//! the connected components of that edge set (union-find), so membership
//! is transitive: A~B and B~C put all three in one group even when A and C
//! fall below the threshold.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use mnemo_core::{Memory, MemoryError, MemoryFilter, MemoryId, MemoryRepository, MemoryResult};
use mnemo_index::{cosine_similarity, EmbeddingProvider, HnswConfig, HnswIndex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Metadata key recording which memories were folded into a representative
pub const MERGED_FROM_KEY: &str = "merged_from";

/// Configuration for duplicate detection
#[derive(Debug, Clone)]
pub struct DuplicateDetectionConfig {
    /// Similarity required for two memories to be considered duplicates
    pub similarity_threshold: f32,
    /// Memories shorter than this (in characters) are skipped
    pub min_content_length: usize,
    /// Maximum number of duplicate groups returned
    pub max_results: usize,
    /// Concurrent embedding requests
    pub embed_concurrency: usize,
}

impl Default for DuplicateDetectionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            min_content_length: 20,
            max_results: 100,
            embed_concurrency: 8,
        }
    }
}

/// A group of transitively similar memories
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// Most recently created member (ties broken by id)
    pub representative_id: MemoryId,
    /// All members of the group, including the representative
    pub member_ids: Vec<MemoryId>,
    pub count: usize,
    /// Mean pairwise similarity within the group
    pub avg_similarity: f32,
    /// Weakest pairwise link within the group
    pub min_similarity: f32,
}

/// Result of merging duplicates into a representative
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub representative: Memory,
    /// Duplicate ids deleted successfully
    pub removed: Vec<MemoryId>,
    /// Duplicate ids whose delete failed (merge metadata already applied)
    pub failed: Vec<MemoryId>,
}

/// A similarity search hit
#[derive(Debug, Clone, Serialize)]
pub struct SimilarMemory {
    pub id: MemoryId,
    pub content: String,
    pub similarity: f32,
}

/// Arena-indexed disjoint set with path compression and union by rank
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Detects and merges near-duplicate memories
pub struct DuplicateDetector {
    repository: Arc<dyn MemoryRepository>,
    provider: Arc<dyn EmbeddingProvider>,
    config: DuplicateDetectionConfig,
}

impl DuplicateDetector {
    pub fn new(
        repository: Arc<dyn MemoryRepository>,
        provider: Arc<dyn EmbeddingProvider>,
        config: DuplicateDetectionConfig,
    ) -> Self {
        Self {
            repository,
            provider,
            config,
        }
    }

    /// Detect all duplicate groups in the current snapshot
    pub async fn detect(&self, cancel: &CancellationToken) -> MemoryResult<Vec<DuplicateGroup>> {
        if !(0.0..=1.0).contains(&self.config.similarity_threshold) {
            return Err(MemoryError::invalid_threshold("similarity_threshold"));
        }

        let memories = self.snapshot().await?;
        if memories.len() < 2 {
            return Ok(Vec::new());
        }

        let embeddings = self.embed_all(&memories, cancel).await?;
        let index = build_index(&memories, &embeddings, self.provider.dimension())?;

        // Enough neighbors to surface every duplicate edge without scanning
        // the full corpus per query
        let k = (self.config.max_results * 2).max(16).min(memories.len());

        let mut set = DisjointSet::new(memories.len());
        let id_to_idx: HashMap<&str, usize> = memories
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.as_str(), i))
            .collect();

        for (i, memory) in memories.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(cancelled("duplicate detection"));
            }
            let hits = index
                .search(&embeddings[i], k)
                .map_err(MemoryError::from)?;
            for hit in hits {
                if hit.key == memory.id.as_str() {
                    continue;
                }
                if hit.similarity >= self.config.similarity_threshold {
                    if let Some(&j) = id_to_idx.get(hit.key.as_str()) {
                        set.union(i, j);
                    }
                }
            }
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..memories.len() {
            components.entry(set.find(i)).or_default().push(i);
        }

        let mut groups: Vec<DuplicateGroup> = components
            .into_values()
            .filter(|members| members.len() >= 2)
            .map(|members| build_group(&memories, &embeddings, members))
            .collect();

        groups.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| {
                    b.avg_similarity
                        .partial_cmp(&a.avg_similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.representative_id.cmp(&b.representative_id))
        });
        groups.truncate(self.config.max_results);

        info!(
            groups = groups.len(),
            threshold = self.config.similarity_threshold,
            "duplicate detection complete"
        );
        Ok(groups)
    }

    /// Merge duplicates into a representative memory.
    ///
    /// All referenced ids are resolved before anything is written. Tags are
    /// unioned and provenance is recorded under `merged_from`, both deduped
    /// so re-merging the same ids is a no-op. Deletes run one at a time;
    /// a failed delete is reported, not fatal.
    pub async fn merge(
        &self,
        representative_id: &MemoryId,
        duplicate_ids: &[MemoryId],
    ) -> MemoryResult<MergeOutcome> {
        let mut representative = self.repository.get(representative_id).await?;
        let mut duplicates = Vec::with_capacity(duplicate_ids.len());
        for id in duplicate_ids {
            duplicates.push(self.repository.get(id).await?);
        }

        let mut tags = representative.tags.clone();
        for dup in &duplicates {
            tags.extend(dup.tags.iter().cloned());
        }
        tags.sort();
        tags.dedup();
        representative.tags = tags;

        let mut merged_from: Vec<String> = representative
            .metadata
            .get(MERGED_FROM_KEY)
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        for id in duplicate_ids {
            if !merged_from.iter().any(|m| m == id.as_str()) {
                merged_from.push(id.to_string());
            }
        }
        representative
            .metadata
            .insert(MERGED_FROM_KEY.to_string(), merged_from.join(","));
        representative.updated_at = Utc::now();

        self.repository.update(representative.clone()).await?;

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for id in duplicate_ids {
            match self.repository.delete(id).await {
                Ok(()) => removed.push(id.clone()),
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to delete duplicate");
                    failed.push(id.clone());
                }
            }
        }

        info!(
            representative = %representative.id,
            removed = removed.len(),
            failed = failed.len(),
            "merge complete"
        );
        Ok(MergeOutcome {
            representative,
            removed,
            failed,
        })
    }

    /// Find memories similar to the given one, above a threshold.
    /// The source memory itself is never returned.
    pub async fn find_similar(
        &self,
        id: &MemoryId,
        threshold: f32,
    ) -> MemoryResult<Vec<SimilarMemory>> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MemoryError::invalid_threshold("threshold"));
        }
        let target = self.repository.get(id).await?;

        let memories = self.snapshot().await?;
        if memories.is_empty() {
            return Ok(Vec::new());
        }
        let cancel = CancellationToken::new();
        let embeddings = self.embed_all(&memories, &cancel).await?;
        let index = build_index(&memories, &embeddings, self.provider.dimension())?;

        let query = self
            .provider
            .embed(&target.content)
            .await
            .map_err(MemoryError::from)?;

        let by_id: HashMap<&str, &Memory> =
            memories.iter().map(|m| (m.id.as_str(), m)).collect();

        let hits = index
            .search(&query, memories.len())
            .map_err(MemoryError::from)?;
        let mut similar: Vec<SimilarMemory> = hits
            .into_iter()
            .filter(|hit| hit.key != id.as_str() && hit.similarity >= threshold)
            .filter_map(|hit| {
                by_id.get(hit.key.as_str()).map(|m| SimilarMemory {
                    id: m.id.clone(),
                    content: m.content.clone(),
                    similarity: hit.similarity.clamp(0.0, 1.0),
                })
            })
            .collect();
        similar.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(similar)
    }

    /// Cosine similarity between two memories, clamped to `[0, 1]`
    pub async fn compute_similarity(
        &self,
        id1: &MemoryId,
        id2: &MemoryId,
    ) -> MemoryResult<f32> {
        let m1 = self.repository.get(id1).await?;
        let m2 = self.repository.get(id2).await?;

        let e1 = self
            .provider
            .embed(&m1.content)
            .await
            .map_err(MemoryError::from)?;
        let e2 = self
            .provider
            .embed(&m2.content)
            .await
            .map_err(MemoryError::from)?;

        Ok(cosine_similarity(&e1, &e2).clamp(0.0, 1.0))
    }

    /// Snapshot of candidate memories, id-sorted for deterministic iteration
    async fn snapshot(&self) -> MemoryResult<Vec<Memory>> {
        let mut memories = self
            .repository
            .list(&MemoryFilter {
                min_content_length: Some(self.config.min_content_length),
                ..Default::default()
            })
            .await?;
        memories.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(memories)
    }

    /// Embed memories with bounded concurrency, preserving input order
    async fn embed_all(
        &self,
        memories: &[Memory],
        cancel: &CancellationToken,
    ) -> MemoryResult<Vec<Vec<f32>>> {
        // Contents are cloned out so the in-flight futures own their data
        let contents: Vec<String> = memories.iter().map(|m| m.content.clone()).collect();
        let mut indexed: Vec<(usize, Vec<f32>)> = stream::iter(contents.into_iter().enumerate())
            .map(|(i, content)| {
                let provider = Arc::clone(&self.provider);
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Err(cancelled("embedding"));
                    }
                    let embedding =
                        provider.embed(&content).await.map_err(MemoryError::from)?;
                    Ok::<_, MemoryError>((i, embedding))
                }
            })
            .buffer_unordered(self.config.embed_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<MemoryResult<Vec<_>>>()?;

        indexed.sort_by_key(|(i, _)| *i);
        debug!(count = indexed.len(), "embedded snapshot");
        Ok(indexed.into_iter().map(|(_, e)| e).collect())
    }
}

fn cancelled(operation: &str) -> MemoryError {
    MemoryError::Computation(format!("{} cancelled", operation))
}

fn build_index(
    memories: &[Memory],
    embeddings: &[Vec<f32>],
    dimension: usize,
) -> MemoryResult<HnswIndex> {
    let mut index = HnswIndex::new(dimension, HnswConfig::default());
    for (memory, embedding) in memories.iter().zip(embeddings) {
        index
            .insert(memory.id.as_str(), embedding.clone())
            .map_err(MemoryError::from)?;
    }
    Ok(index)
}

fn build_group(
    memories: &[Memory],
    embeddings: &[Vec<f32>],
    mut members: Vec<usize>,
) -> DuplicateGroup {
    members.sort();

    let mut sum = 0.0f32;
    let mut min = 1.0f32;
    let mut pairs = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            let sim = cosine_similarity(&embeddings[i], &embeddings[j]).clamp(0.0, 1.0);
            sum += sim;
            min = min.min(sim);
            pairs += 1;
        }
    }
    let avg = if pairs > 0 { sum / pairs as f32 } else { 0.0 };

    let representative = members
        .iter()
        .map(|&i| &memories[i])
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|m| m.id.clone())
        .unwrap_or_else(|| memories[members[0]].id.clone());

    let member_ids: Vec<MemoryId> = members.iter().map(|&i| memories[i].id.clone()).collect();
    DuplicateGroup {
        representative_id: representative,
        count: member_ids.len(),
        member_ids,
        avg_similarity: avg,
        min_similarity: min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disjoint_set_transitive() {
        let mut set = DisjointSet::new(5);
        set.union(0, 1);
        set.union(1, 2);
        assert_eq!(set.find(0), set.find(2));
        assert_ne!(set.find(0), set.find(3));
        // Idempotent
        set.union(0, 2);
        assert_eq!(set.find(1), set.find(2));
    }

    #[test]
    fn test_disjoint_set_disjoint_components() {
        let mut set = DisjointSet::new(6);
        set.union(0, 1);
        set.union(2, 3);
        set.union(4, 5);
        let roots: std::collections::HashSet<usize> =
            (0..6).map(|i| set.find(i)).collect();
        assert_eq!(roots.len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_embedding() {
        let repo = Arc::new(crate::store::InMemoryRepository::new());
        for i in 0..2 {
            repo.create(
                Memory::new("a memory long enough to pass the length filter")
                    .with_id(format!("m{i}")),
            )
            .await
            .unwrap();
        }
        let detector = DuplicateDetector::new(
            repo,
            Arc::new(mnemo_index::HashEmbeddingProvider::new(16)),
            DuplicateDetectionConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = detector.detect(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_build_group_representative_is_most_recent() {
        let base = Utc::now();
        let memories = vec![
            Memory::new("alpha content for grouping tests")
                .with_id("a")
                .with_created_at(base),
            Memory::new("alpha content for grouping tests")
                .with_id("b")
                .with_created_at(base + chrono::Duration::seconds(10)),
            Memory::new("alpha content for grouping tests")
                .with_id("c")
                .with_created_at(base + chrono::Duration::seconds(5)),
        ];
        let embeddings = vec![vec![1.0, 0.0]; 3];
        let group = build_group(&memories, &embeddings, vec![0, 1, 2]);
        assert_eq!(group.representative_id.as_str(), "b");
        assert_eq!(group.count, 3);
        assert!((group.avg_similarity - 1.0).abs() < 1e-5);
        assert!((group.min_similarity - 1.0).abs() < 1e-5);
    }
}
