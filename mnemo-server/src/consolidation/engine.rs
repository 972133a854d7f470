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

//! Consolidation orchestrator.
//!
//! Runs duplicate detection, clustering, and knowledge extraction over one
//! repository snapshot under a single options struct, applies the
//! auto-merge policy, and assembles the report. Sub-component failures are
//! wrapped with the failing operation's name and never swallowed.

use crate::consolidation::clustering::{Cluster, ClusteringConfig, ClusteringEngine};
use crate::consolidation::duplicates::{
    DuplicateDetectionConfig, DuplicateDetector, DuplicateGroup, SimilarMemory,
};
use crate::consolidation::knowledge::{KnowledgeExtractor, KnowledgeGraph};
use chrono::{DateTime, Utc};
use mnemo_core::{MemoryError, MemoryFilter, MemoryId, MemoryRepository, MemoryResult};
use mnemo_index::EmbeddingProvider;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Options for a consolidation run.
///
/// When all three analysis flags are false, all three analyses run
/// (run-everything default).
#[derive(Debug, Clone)]
pub struct ConsolidationOptions {
    pub detect_duplicates: bool,
    pub cluster_memories: bool,
    pub extract_knowledge: bool,
    pub auto_merge: bool,
    pub similarity_threshold: f32,
    pub min_similarity_for_merge: f32,
    pub clustering_algorithm: String,
    pub num_clusters: usize,
}

impl Default for ConsolidationOptions {
    fn default() -> Self {
        Self {
            detect_duplicates: false,
            cluster_memories: false,
            extract_knowledge: false,
            auto_merge: false,
            similarity_threshold: 0.95,
            min_similarity_for_merge: 0.98,
            clustering_algorithm: super::clustering::ALGORITHM_DBSCAN.to_string(),
            num_clusters: 10,
        }
    }
}

/// Result of a consolidation run
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub total_memories: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub clusters: Vec<Cluster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<KnowledgeGraph>,
    /// Duplicate records removed by auto-merge
    pub merged_count: usize,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot-level consolidation statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationStatistics {
    pub total_memories: usize,
    pub duplicate_groups: usize,
    /// Duplicates beyond each group's representative
    pub duplicate_count: usize,
    pub cluster_count: usize,
    pub avg_cluster_size: f32,
    pub timestamp: DateTime<Utc>,
}

/// A cluster together with its derived knowledge graph
#[derive(Debug, Clone, Serialize)]
pub struct ClusterDetails {
    pub cluster: Cluster,
    /// Human-readable summary built from the dominant keyword
    pub label: String,
    pub knowledge_graph: KnowledgeGraph,
}

/// Orchestrates the consolidation pipeline
pub struct ConsolidationEngine {
    repository: Arc<dyn MemoryRepository>,
    provider: Arc<dyn EmbeddingProvider>,
    /// Unrecognized-algorithm fallback policy for this server
    lenient_algorithm_fallback: bool,
    /// Concurrent embedding requests per batch
    embed_concurrency: usize,
}

impl ConsolidationEngine {
    pub fn new(
        repository: Arc<dyn MemoryRepository>,
        provider: Arc<dyn EmbeddingProvider>,
        lenient_algorithm_fallback: bool,
    ) -> Self {
        Self {
            repository,
            provider,
            lenient_algorithm_fallback,
            embed_concurrency: DuplicateDetectionConfig::default().embed_concurrency,
        }
    }

    pub fn with_embed_concurrency(mut self, embed_concurrency: usize) -> Self {
        self.embed_concurrency = embed_concurrency.max(1);
        self
    }

    /// Run consolidation per the given options
    pub async fn consolidate(
        &self,
        options: &ConsolidationOptions,
        cancel: &CancellationToken,
    ) -> MemoryResult<ConsolidationReport> {
        if !(0.0..=1.0).contains(&options.similarity_threshold) {
            return Err(MemoryError::invalid_threshold("similarity_threshold"));
        }
        if !(0.0..=1.0).contains(&options.min_similarity_for_merge) {
            return Err(MemoryError::invalid_threshold("min_similarity_for_merge"));
        }
        if options.num_clusters == 0 {
            return Err(MemoryError::Validation(
                "num_clusters must be greater than zero".to_string(),
            ));
        }
        if options.min_similarity_for_merge < options.similarity_threshold {
            // Accepted, but every detected group will clear the merge bar
            warn!(
                min_similarity_for_merge = options.min_similarity_for_merge,
                similarity_threshold = options.similarity_threshold,
                "merge threshold below detection threshold"
            );
        }

        let run_all =
            !options.detect_duplicates && !options.cluster_memories && !options.extract_knowledge;
        let detect = options.detect_duplicates || run_all;
        let cluster = options.cluster_memories || run_all;
        let extract = options.extract_knowledge || run_all;

        let started = Instant::now();
        let timestamp = Utc::now();
        let total_memories = self.repository.count().await?;

        let mut duplicate_groups = Vec::new();
        let mut merged_count = 0usize;
        if detect {
            let detector = self.detector(DuplicateDetectionConfig {
                similarity_threshold: options.similarity_threshold,
                ..Default::default()
            });
            duplicate_groups = detector
                .detect(cancel)
                .await
                .map_err(|e| wrap("duplicate detection", e))?;

            if options.auto_merge {
                merged_count = self
                    .auto_merge(&detector, &mut duplicate_groups, options.min_similarity_for_merge)
                    .await?;
            }
        }

        let mut clusters = Vec::new();
        if cluster {
            let engine = self.clustering(ClusteringConfig {
                algorithm: options.clustering_algorithm.clone(),
                num_clusters: options.num_clusters,
                ..Default::default()
            });
            clusters = engine
                .cluster(cancel)
                .await
                .map_err(|e| wrap("clustering", e))?;
        }

        let mut knowledge_graph = None;
        if extract {
            let ids: Vec<MemoryId> = self
                .repository
                .list(&MemoryFilter::default())
                .await?
                .into_iter()
                .map(|m| m.id)
                .collect();
            if !ids.is_empty() {
                let extractor = KnowledgeExtractor::new(self.repository.clone());
                knowledge_graph = Some(
                    extractor
                        .extract_from_memories(&ids)
                        .await
                        .map_err(|e| wrap("knowledge extraction", e))?,
                );
            }
        }

        let report = ConsolidationReport {
            total_memories,
            duplicate_groups,
            clusters,
            knowledge_graph,
            merged_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            timestamp,
        };
        info!(
            total = report.total_memories,
            groups = report.duplicate_groups.len(),
            clusters = report.clusters.len(),
            merged = report.merged_count,
            "consolidation complete"
        );
        Ok(report)
    }

    /// Merge groups whose weakest internal link clears the merge bar.
    /// Returns the number of duplicate records removed. Merged groups are
    /// removed from the report; groups below the bar stay untouched.
    async fn auto_merge(
        &self,
        detector: &DuplicateDetector,
        groups: &mut Vec<DuplicateGroup>,
        min_similarity_for_merge: f32,
    ) -> MemoryResult<usize> {
        let mut merged_count = 0usize;
        let mut remaining = Vec::with_capacity(groups.len());

        for group in groups.drain(..) {
            if group.min_similarity < min_similarity_for_merge {
                remaining.push(group);
                continue;
            }
            let duplicate_ids: Vec<MemoryId> = group
                .member_ids
                .iter()
                .filter(|id| **id != group.representative_id)
                .cloned()
                .collect();
            let outcome = detector
                .merge(&group.representative_id, &duplicate_ids)
                .await
                .map_err(|e| wrap("auto-merge", e))?;
            merged_count += outcome.removed.len();
        }

        *groups = remaining;
        Ok(merged_count)
    }

    /// Memories similar to the given one, above the threshold
    pub async fn find_similar_memories(
        &self,
        id: &MemoryId,
        threshold: f32,
    ) -> MemoryResult<Vec<SimilarMemory>> {
        self.detector(DuplicateDetectionConfig::default())
            .find_similar(id, threshold)
            .await
    }

    /// Cosine similarity between two memories, clamped to `[0, 1]`
    pub async fn compute_similarity(
        &self,
        id1: &MemoryId,
        id2: &MemoryId,
    ) -> MemoryResult<f32> {
        self.detector(DuplicateDetectionConfig::default())
            .compute_similarity(id1, id2)
            .await
    }

    /// Recluster with default settings and return the requested cluster
    /// together with its knowledge graph
    pub async fn get_cluster_details(&self, cluster_id: usize) -> MemoryResult<ClusterDetails> {
        let engine = self.clustering(ClusteringConfig::default());
        let cancel = CancellationToken::new();
        let clusters = engine
            .cluster(&cancel)
            .await
            .map_err(|e| wrap("clustering", e))?;

        let cluster = clusters
            .into_iter()
            .find(|c| c.id == cluster_id)
            .ok_or_else(|| MemoryError::NotFound(format!("cluster {}", cluster_id)))?;

        let extractor = KnowledgeExtractor::new(self.repository.clone());
        let knowledge_graph = extractor
            .extract_from_memories(&cluster.member_ids)
            .await
            .map_err(|e| wrap("knowledge extraction", e))?;
        let label = cluster_label(&cluster, &knowledge_graph);

        Ok(ClusterDetails {
            cluster,
            label,
            knowledge_graph,
        })
    }

    /// Snapshot statistics: duplicate and cluster counts under default
    /// settings
    pub async fn statistics(&self) -> MemoryResult<ConsolidationStatistics> {
        let total_memories = self.repository.count().await?;
        let cancel = CancellationToken::new();

        let groups = self
            .detector(DuplicateDetectionConfig::default())
            .detect(&cancel)
            .await
            .map_err(|e| wrap("duplicate detection", e))?;
        let duplicate_count = groups.iter().map(|g| g.count - 1).sum();

        let engine = self.clustering(ClusteringConfig::default());
        let clusters = engine
            .cluster(&cancel)
            .await
            .map_err(|e| wrap("clustering", e))?;
        let avg_cluster_size = if clusters.is_empty() {
            0.0
        } else {
            total_memories as f32 / clusters.len() as f32
        };

        Ok(ConsolidationStatistics {
            total_memories,
            duplicate_groups: groups.len(),
            duplicate_count,
            cluster_count: clusters.len(),
            avg_cluster_size,
            timestamp: Utc::now(),
        })
    }

    /// Direct access to a duplicate detector with the given settings
    pub fn detector(&self, mut config: DuplicateDetectionConfig) -> DuplicateDetector {
        config.embed_concurrency = self.embed_concurrency;
        DuplicateDetector::new(self.repository.clone(), self.provider.clone(), config)
    }

    /// Direct access to a clustering engine with the given settings
    pub fn clustering(&self, mut config: ClusteringConfig) -> ClusteringEngine {
        config.lenient_algorithm_fallback = self.lenient_algorithm_fallback;
        config.embed_concurrency = self.embed_concurrency;
        ClusteringEngine::new(self.repository.clone(), self.provider.clone(), config)
    }

    /// Direct access to the knowledge extractor
    pub fn extractor(&self) -> KnowledgeExtractor {
        KnowledgeExtractor::new(self.repository.clone())
    }
}

/// Label a cluster by its most frequent keyword; "Memories" when the
/// members yield no recurring term
fn cluster_label(cluster: &Cluster, graph: &KnowledgeGraph) -> String {
    let keyword = graph.keywords.first().map(String::as_str).unwrap_or("Memories");
    format!(
        "Cluster {}: {} ({} memories)",
        cluster.id, keyword, cluster.size
    )
}

fn wrap(operation: &str, err: MemoryError) -> MemoryError {
    match err {
        // Input errors pass through untouched so their message stays exact
        MemoryError::Validation(_) | MemoryError::NotFound(_) => err,
        other => MemoryError::in_operation(operation, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRepository;
    use mnemo_core::Memory;
    use mnemo_index::HashEmbeddingProvider;

    fn test_engine() -> (ConsolidationEngine, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        let engine = ConsolidationEngine::new(
            repo.clone(),
            Arc::new(HashEmbeddingProvider::new(64)),
            false,
        );
        (engine, repo)
    }

    #[tokio::test]
    async fn test_invalid_threshold_message() {
        let (engine, _repo) = test_engine();
        let err = engine
            .consolidate(
                &ConsolidationOptions {
                    similarity_threshold: 1.5,
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "similarity_threshold must be between 0.0 and 1.0"
        );
    }

    #[tokio::test]
    async fn test_run_everything_default() {
        let (engine, repo) = test_engine();
        for i in 0..3 {
            repo.create(Memory::new(format!(
                "memory about topic number {i} with plenty of content"
            )))
            .await
            .unwrap();
        }

        let report = engine
            .consolidate(&ConsolidationOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.total_memories, 3);
        // All three analyses ran: knowledge graph is present
        assert!(report.knowledge_graph.is_some());
    }

    #[tokio::test]
    async fn test_cluster_details_carry_label() {
        let (engine, repo) = test_engine();
        for i in 0..4 {
            repo.create(
                Memory::new("kubernetes kubernetes deployment restarts under memory pressure")
                    .with_id(format!("m{i}")),
            )
            .await
            .unwrap();
        }

        let details = engine.get_cluster_details(0).await.unwrap();
        assert_eq!(details.cluster.size, 4);
        assert!(details.label.starts_with("Cluster 0:"));
        assert!(details.label.ends_with("(4 memories)"));
    }

    #[tokio::test]
    async fn test_cancelled_run_errors() {
        let (engine, repo) = test_engine();
        for i in 0..2 {
            repo.create(Memory::new(format!(
                "cancellable memory number {i} with plenty of content"
            )))
            .await
            .unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .consolidate(&ConsolidationOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
