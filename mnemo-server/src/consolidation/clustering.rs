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

//! Semantic clustering of memories.
//!
//! Both algorithms work in similarity-complement space: the distance
//! between two memories is `1 - cosine(a, b)`. Memories are iterated in
//! id order and K-means is seeded from the first K distinct vectors, so
//! the same snapshot always produces the same clusters.

use futures::stream::{self, StreamExt};
use mnemo_core::{Memory, MemoryError, MemoryFilter, MemoryRepository, MemoryResult, MemoryId};
use mnemo_index::{cosine_similarity, EmbeddingProvider};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ALGORITHM_DBSCAN: &str = "dbscan";
pub const ALGORITHM_KMEANS: &str = "kmeans";

/// Configuration for clustering
#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    /// "dbscan" or "kmeans"
    pub algorithm: String,
    /// Minimum neighbors (the point itself excluded) for a DBSCAN core
    pub min_cluster_size: usize,
    /// DBSCAN neighborhood radius in cosine-distance space
    pub epsilon_distance: f32,
    /// K for K-means
    pub num_clusters: usize,
    /// Lloyd's iteration cap
    pub max_iterations: usize,
    /// Fall back to DBSCAN on an unrecognized algorithm instead of erroring
    pub lenient_algorithm_fallback: bool,
    /// Concurrent embedding requests
    pub embed_concurrency: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            algorithm: ALGORITHM_DBSCAN.to_string(),
            min_cluster_size: 3,
            epsilon_distance: 0.15,
            num_clusters: 10,
            max_iterations: 100,
            lenient_algorithm_fallback: false,
            embed_concurrency: 8,
        }
    }
}

/// A cluster of semantically related memories
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    /// Stable within a run: numbered in first-discovery order
    pub id: usize,
    pub member_ids: Vec<MemoryId>,
    pub size: usize,
    /// Mean vector of the members
    pub centroid: Vec<f32>,
    /// Mean cosine distance from members to the centroid
    pub avg_distance: f32,
    /// Algorithm that produced this cluster
    pub algorithm: String,
}

/// Clusters memories with DBSCAN or K-means
pub struct ClusteringEngine {
    repository: Arc<dyn MemoryRepository>,
    provider: Arc<dyn EmbeddingProvider>,
    config: ClusteringConfig,
}

impl ClusteringEngine {
    pub fn new(
        repository: Arc<dyn MemoryRepository>,
        provider: Arc<dyn EmbeddingProvider>,
        config: ClusteringConfig,
    ) -> Self {
        Self {
            repository,
            provider,
            config,
        }
    }

    /// Cluster the current snapshot with the configured algorithm
    pub async fn cluster(&self, cancel: &CancellationToken) -> MemoryResult<Vec<Cluster>> {
        if self.config.num_clusters == 0 {
            return Err(MemoryError::Validation(
                "num_clusters must be greater than zero".to_string(),
            ));
        }

        let algorithm = match self.config.algorithm.as_str() {
            ALGORITHM_DBSCAN | ALGORITHM_KMEANS => self.config.algorithm.clone(),
            other => {
                if self.config.lenient_algorithm_fallback {
                    warn!(algorithm = other, "unknown clustering algorithm, falling back to dbscan");
                    ALGORITHM_DBSCAN.to_string()
                } else {
                    return Err(MemoryError::Validation(format!(
                        "unknown clustering algorithm: {}",
                        other
                    )));
                }
            }
        };

        let mut memories = self.repository.list(&MemoryFilter::default()).await?;
        memories.sort_by(|a, b| a.id.cmp(&b.id));
        if memories.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embed_all(&memories, cancel).await?;

        let clusters = match algorithm.as_str() {
            ALGORITHM_DBSCAN => self.dbscan(&memories, &embeddings, cancel)?,
            _ => self.kmeans(&memories, &embeddings, cancel)?,
        };

        info!(
            algorithm = %algorithm,
            clusters = clusters.len(),
            memories = memories.len(),
            "clustering complete"
        );
        Ok(clusters)
    }

    /// DBSCAN over cosine distance. Noise points belong to no cluster.
    fn dbscan(
        &self,
        memories: &[Memory],
        embeddings: &[Vec<f32>],
        cancel: &CancellationToken,
    ) -> MemoryResult<Vec<Cluster>> {
        let n = memories.len();
        let mut visited = vec![false; n];
        // usize::MAX marks noise/unassigned
        let mut assignment = vec![usize::MAX; n];
        let mut next_cluster = 0usize;

        for i in 0..n {
            if cancel.is_cancelled() {
                return Err(MemoryError::Computation("clustering cancelled".to_string()));
            }
            if visited[i] {
                continue;
            }
            visited[i] = true;

            let neighbors = self.neighbors_of(i, embeddings);
            if neighbors.len() < self.config.min_cluster_size {
                continue; // Noise until claimed by an expansion
            }

            assignment[i] = next_cluster;
            let mut queue: VecDeque<usize> = neighbors.into();
            while let Some(j) = queue.pop_front() {
                if assignment[j] == usize::MAX {
                    assignment[j] = next_cluster;
                }
                if visited[j] {
                    continue;
                }
                visited[j] = true;
                let expansion = self.neighbors_of(j, embeddings);
                if expansion.len() >= self.config.min_cluster_size {
                    queue.extend(expansion);
                }
            }
            next_cluster += 1;
        }

        Ok(assemble_clusters(
            memories,
            embeddings,
            &assignment,
            next_cluster,
            ALGORITHM_DBSCAN,
        ))
    }

    /// K-means (Lloyd's) over cosine distance. Every memory is assigned;
    /// K is reduced when the snapshot has fewer distinct vectors, and
    /// empty clusters are dropped.
    fn kmeans(
        &self,
        memories: &[Memory],
        embeddings: &[Vec<f32>],
        cancel: &CancellationToken,
    ) -> MemoryResult<Vec<Cluster>> {
        let n = memories.len();

        // Seed centroids from the first K distinct vectors in id order
        let mut centroids: Vec<Vec<f32>> = Vec::new();
        for embedding in embeddings {
            if centroids.len() >= self.config.num_clusters {
                break;
            }
            if !centroids.iter().any(|c| c == embedding) {
                centroids.push(embedding.clone());
            }
        }
        let k = centroids.len();
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut assignment = vec![0usize; n];
        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(MemoryError::Computation("clustering cancelled".to_string()));
            }

            let mut changed = false;
            for i in 0..n {
                let mut best = 0usize;
                let mut best_dist = f32::MAX;
                for (c, centroid) in centroids.iter().enumerate() {
                    let dist = 1.0 - cosine_similarity(&embeddings[i], centroid);
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                if assignment[i] != best {
                    assignment[i] = best;
                    changed = true;
                }
            }

            if !changed {
                debug!(iteration, "k-means converged");
                break;
            }

            let dim = embeddings[0].len();
            let mut sums = vec![vec![0.0f32; dim]; k];
            let mut counts = vec![0usize; k];
            for i in 0..n {
                counts[assignment[i]] += 1;
                for d in 0..dim {
                    sums[assignment[i]][d] += embeddings[i][d];
                }
            }
            for c in 0..k {
                if counts[c] > 0 {
                    for d in 0..dim {
                        sums[c][d] /= counts[c] as f32;
                    }
                    centroids[c] = std::mem::take(&mut sums[c]);
                }
                // Empty clusters keep their previous centroid
            }
        }

        // Renumber clusters in first-discovery order and drop empty ones
        let mut remap = vec![usize::MAX; k];
        let mut next = 0usize;
        let mut renumbered = vec![usize::MAX; n];
        for i in 0..n {
            if remap[assignment[i]] == usize::MAX {
                remap[assignment[i]] = next;
                next += 1;
            }
            renumbered[i] = remap[assignment[i]];
        }

        Ok(assemble_clusters(
            memories,
            embeddings,
            &renumbered,
            next,
            ALGORITHM_KMEANS,
        ))
    }

    /// Indices within epsilon cosine distance of `idx`, excluding itself
    fn neighbors_of(&self, idx: usize, embeddings: &[Vec<f32>]) -> Vec<usize> {
        let mut neighbors = Vec::new();
        for i in 0..embeddings.len() {
            if i == idx {
                continue;
            }
            let dist = 1.0 - cosine_similarity(&embeddings[idx], &embeddings[i]);
            if dist <= self.config.epsilon_distance {
                neighbors.push(i);
            }
        }
        neighbors
    }

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
                        return Err(MemoryError::Computation(
                            "embedding cancelled".to_string(),
                        ));
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
        Ok(indexed.into_iter().map(|(_, e)| e).collect())
    }
}

/// Materialize `Cluster` records from per-memory assignments.
/// `usize::MAX` assignments (noise) are skipped.
fn assemble_clusters(
    memories: &[Memory],
    embeddings: &[Vec<f32>],
    assignment: &[usize],
    cluster_count: usize,
    algorithm: &str,
) -> Vec<Cluster> {
    if cluster_count == 0 {
        return Vec::new();
    }

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); cluster_count];
    for (i, &c) in assignment.iter().enumerate() {
        if c != usize::MAX {
            members[c].push(i);
        }
    }

    members
        .into_iter()
        .enumerate()
        .filter(|(_, m)| !m.is_empty())
        .map(|(id, member_indices)| {
            let dim = embeddings[member_indices[0]].len();
            let mut centroid = vec![0.0f32; dim];
            for &i in &member_indices {
                for d in 0..dim {
                    centroid[d] += embeddings[i][d];
                }
            }
            for value in centroid.iter_mut() {
                *value /= member_indices.len() as f32;
            }

            let avg_distance = member_indices
                .iter()
                .map(|&i| 1.0 - cosine_similarity(&embeddings[i], &centroid))
                .sum::<f32>()
                / member_indices.len() as f32;

            Cluster {
                id,
                size: member_indices.len(),
                member_ids: member_indices
                    .iter()
                    .map(|&i| memories[i].id.clone())
                    .collect(),
                centroid,
                avg_distance,
                algorithm: algorithm.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(id: &str, content: &str) -> Memory {
        Memory::new(content).with_id(id)
    }

    fn engine(config: ClusteringConfig) -> ClusteringEngine {
        ClusteringEngine::new(
            Arc::new(crate::store::InMemoryRepository::new()),
            Arc::new(mnemo_index::HashEmbeddingProvider::new(16)),
            config,
        )
    }

    #[test]
    fn test_dbscan_groups_tight_points_and_drops_noise() {
        let eng = engine(ClusteringConfig {
            min_cluster_size: 2,
            epsilon_distance: 0.2,
            ..Default::default()
        });

        // Three near-identical vectors plus one outlier
        let memories: Vec<Memory> = (0..4)
            .map(|i| memory(&format!("m{i}"), "content placeholder text here"))
            .collect();
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.1, 0.0],
            vec![0.98, 0.12, 0.0],
            vec![0.0, 0.0, 1.0],
        ];

        let cancel = CancellationToken::new();
        let clusters = eng.dbscan(&memories, &embeddings, &cancel).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].size, 3);
        assert!(!clusters[0]
            .member_ids
            .iter()
            .any(|id| id.as_str() == "m3"));
        assert_eq!(clusters[0].algorithm, ALGORITHM_DBSCAN);
    }

    #[test]
    fn test_dbscan_core_excludes_self_from_neighbor_count() {
        // min_cluster_size is a neighbor count: three mutually close points
        // give each point only two neighbors, which is below three
        let eng = engine(ClusteringConfig {
            min_cluster_size: 3,
            epsilon_distance: 0.2,
            ..Default::default()
        });

        let memories: Vec<Memory> = (0..3)
            .map(|i| memory(&format!("m{i}"), "content placeholder text here"))
            .collect();
        let embeddings = vec![vec![1.0, 0.0]; 3];

        let cancel = CancellationToken::new();
        let clusters = eng.dbscan(&memories, &embeddings, &cancel).unwrap();
        assert!(clusters.is_empty());

        // A fourth close point puts every point at the threshold
        let memories: Vec<Memory> = (0..4)
            .map(|i| memory(&format!("m{i}"), "content placeholder text here"))
            .collect();
        let embeddings = vec![vec![1.0, 0.0]; 4];
        let clusters = eng.dbscan(&memories, &embeddings, &cancel).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].size, 4);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_embedding() {
        let repo = Arc::new(crate::store::InMemoryRepository::new());
        repo.create(memory("m0", "content placeholder text here"))
            .await
            .unwrap();
        let eng = ClusteringEngine::new(
            repo,
            Arc::new(mnemo_index::HashEmbeddingProvider::new(16)),
            ClusteringConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = eng.cluster(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_kmeans_assigns_every_point() {
        let eng = engine(ClusteringConfig {
            algorithm: ALGORITHM_KMEANS.to_string(),
            num_clusters: 2,
            ..Default::default()
        });

        let memories: Vec<Memory> = (0..6)
            .map(|i| memory(&format!("m{i}"), "content placeholder text here"))
            .collect();
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.95, 0.05],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![0.05, 0.95],
            vec![0.1, 0.9],
        ];

        let cancel = CancellationToken::new();
        let clusters = eng.kmeans(&memories, &embeddings, &cancel).unwrap();
        let total: usize = clusters.iter().map(|c| c.size).sum();
        assert_eq!(total, 6);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_kmeans_reduces_k_below_point_count() {
        let eng = engine(ClusteringConfig {
            algorithm: ALGORITHM_KMEANS.to_string(),
            num_clusters: 10,
            ..Default::default()
        });

        let memories: Vec<Memory> = (0..3)
            .map(|i| memory(&format!("m{i}"), "content placeholder text here"))
            .collect();
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]];

        let cancel = CancellationToken::new();
        let clusters = eng.kmeans(&memories, &embeddings, &cancel).unwrap();
        let total: usize = clusters.iter().map(|c| c.size).sum();
        assert_eq!(total, 3);
        assert!(clusters.len() <= 2); // Only two distinct vectors
    }

    #[test]
    fn test_kmeans_deterministic() {
        let run = || {
            let eng = engine(ClusteringConfig {
                algorithm: ALGORITHM_KMEANS.to_string(),
                num_clusters: 3,
                ..Default::default()
            });
            let memories: Vec<Memory> = (0..9)
                .map(|i| memory(&format!("m{i}"), "content placeholder text here"))
                .collect();
            let embeddings: Vec<Vec<f32>> = (0..9)
                .map(|i| {
                    let angle = i as f32 * 0.7;
                    vec![angle.cos(), angle.sin()]
                })
                .collect();
            let cancel = CancellationToken::new();
            eng.kmeans(&memories, &embeddings, &cancel)
                .unwrap()
                .into_iter()
                .map(|c| (c.id, c.member_ids))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn test_unknown_algorithm_rejected() {
        let eng = engine(ClusteringConfig {
            algorithm: "agglomerative".to_string(),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let err = eng.cluster(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("unknown clustering algorithm"));
    }

    #[tokio::test]
    async fn test_lenient_fallback_runs_dbscan() {
        let eng = engine(ClusteringConfig {
            algorithm: "agglomerative".to_string(),
            lenient_algorithm_fallback: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        // Empty repository: fallback path must still succeed
        assert!(eng.cluster(&cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_clusters_rejected() {
        let eng = engine(ClusteringConfig {
            num_clusters: 0,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let err = eng.cluster(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("num_clusters"));
    }
}
