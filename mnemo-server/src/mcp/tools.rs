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

//! The nine consolidation tools.
//!
//! Each tool deserializes its input with serde defaults, runs the engine,
//! and returns domain failures as `is_error` tool results so they cross
//! the protocol boundary as output, never as JSON-RPC errors.

use crate::consolidation::{
    ClusteringConfig, ConsolidationEngine, ConsolidationOptions, DuplicateDetectionConfig,
};
use crate::mcp::registry::{McpTool, RegistrationError, ToolContext, ToolError, ToolRegistry, ToolResult};
use async_trait::async_trait;
use mnemo_core::MemoryId;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn default_similarity_threshold() -> f32 {
    0.95
}
fn default_min_similarity_for_merge() -> f32 {
    0.98
}
fn default_algorithm() -> String {
    "dbscan".to_string()
}
fn default_num_clusters() -> usize {
    10
}
fn default_min_content_length() -> usize {
    20
}
fn default_max_results() -> usize {
    100
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_epsilon_distance() -> f32 {
    0.15
}
fn default_find_similar_threshold() -> f32 {
    0.85
}

fn parse_input<'a, T: Deserialize<'a>>(params: Value) -> Result<T, ToolError> {
    T::deserialize(params).map_err(|e| ToolError::InvalidParams(format!("Invalid input: {}", e)))
}

/// Shared state for every consolidation tool
struct ToolBase {
    engine: Arc<ConsolidationEngine>,
    /// Parent token; each call runs under a child so server shutdown
    /// cancels in-flight work
    shutdown: CancellationToken,
    schema: Value,
}

impl ToolBase {
    fn call_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// Register all nine consolidation tools
pub fn register_consolidation_tools(
    registry: &ToolRegistry,
    engine: Arc<ConsolidationEngine>,
    shutdown: CancellationToken,
) -> Result<(), RegistrationError> {
    macro_rules! base {
        ($schema:expr) => {
            ToolBase {
                engine: engine.clone(),
                shutdown: shutdown.clone(),
                schema: $schema,
            }
        };
    }

    registry.register(Arc::new(ConsolidateMemoriesTool {
        base: base!(consolidate_schema()),
    }))?;
    registry.register(Arc::new(DetectDuplicatesTool {
        base: base!(detect_schema()),
    }))?;
    registry.register(Arc::new(MergeDuplicatesTool {
        base: base!(merge_schema()),
    }))?;
    registry.register(Arc::new(ClusterMemoriesTool {
        base: base!(cluster_schema()),
    }))?;
    registry.register(Arc::new(ExtractKnowledgeTool {
        base: base!(extract_schema()),
    }))?;
    registry.register(Arc::new(FindSimilarMemoriesTool {
        base: base!(find_similar_schema()),
    }))?;
    registry.register(Arc::new(GetClusterDetailsTool {
        base: base!(cluster_details_schema()),
    }))?;
    registry.register(Arc::new(GetConsolidationStatsTool {
        base: base!(stats_schema()),
    }))?;
    registry.register(Arc::new(ComputeSimilarityTool {
        base: base!(compute_similarity_schema()),
    }))?;
    Ok(())
}

// =============================================================================
// consolidate_memories
// =============================================================================

#[derive(Debug, Deserialize)]
struct ConsolidateMemoriesInput {
    #[serde(default)]
    detect_duplicates: bool,
    #[serde(default)]
    cluster_memories: bool,
    #[serde(default)]
    extract_knowledge: bool,
    #[serde(default)]
    auto_merge: bool,
    #[serde(default = "default_similarity_threshold")]
    similarity_threshold: f32,
    #[serde(default = "default_min_similarity_for_merge")]
    min_similarity_for_merge: f32,
    #[serde(default = "default_algorithm")]
    clustering_algorithm: String,
    #[serde(default = "default_num_clusters")]
    num_clusters: usize,
}

fn consolidate_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "detect_duplicates": { "type": "boolean" },
            "cluster_memories": { "type": "boolean" },
            "extract_knowledge": { "type": "boolean" },
            "auto_merge": { "type": "boolean" },
            "similarity_threshold": { "type": "number" },
            "min_similarity_for_merge": { "type": "number" },
            "clustering_algorithm": { "type": "string" },
            "num_clusters": { "type": "integer", "minimum": 1 }
        }
    })
}

struct ConsolidateMemoriesTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for ConsolidateMemoriesTool {
    fn name(&self) -> &str {
        "consolidate_memories"
    }
    fn description(&self) -> &str {
        "Performs comprehensive memory consolidation: detects duplicates, clusters memories, extracts knowledge graphs, and optionally auto-merges"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: ConsolidateMemoriesInput = parse_input(params)?;
        let options = ConsolidationOptions {
            detect_duplicates: input.detect_duplicates,
            cluster_memories: input.cluster_memories,
            extract_knowledge: input.extract_knowledge,
            auto_merge: input.auto_merge,
            similarity_threshold: input.similarity_threshold,
            min_similarity_for_merge: input.min_similarity_for_merge,
            clustering_algorithm: input.clustering_algorithm,
            num_clusters: input.num_clusters,
        };

        match self
            .base
            .engine
            .consolidate(&options, &self.base.call_token())
            .await
        {
            Ok(report) => Ok(ToolResult::ok(json!({ "report": report }))),
            Err(e) => Ok(ToolResult::err(format!("Consolidation failed: {}", e))),
        }
    }
}

// =============================================================================
// detect_duplicates
// =============================================================================

#[derive(Debug, Deserialize)]
struct DetectDuplicatesInput {
    #[serde(default = "default_similarity_threshold")]
    similarity_threshold: f32,
    #[serde(default = "default_min_content_length")]
    min_content_length: usize,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn detect_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "similarity_threshold": { "type": "number" },
            "min_content_length": { "type": "integer", "minimum": 0 },
            "max_results": { "type": "integer", "minimum": 1 }
        }
    })
}

struct DetectDuplicatesTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for DetectDuplicatesTool {
    fn name(&self) -> &str {
        "detect_duplicates"
    }
    fn description(&self) -> &str {
        "Detects duplicate and near-duplicate memories using semantic similarity with transitive grouping"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: DetectDuplicatesInput = parse_input(params)?;
        let detector = self.base.engine.detector(DuplicateDetectionConfig {
            similarity_threshold: input.similarity_threshold,
            min_content_length: input.min_content_length,
            max_results: input.max_results,
            ..Default::default()
        });

        match detector.detect(&self.base.call_token()).await {
            Ok(groups) => {
                let total_duplicates: usize = groups.iter().map(|g| g.count - 1).sum();
                Ok(ToolResult::ok(json!({
                    "duplicate_groups": groups,
                    "total_groups": groups.len(),
                    "total_duplicates": total_duplicates,
                })))
            }
            Err(e) => Ok(ToolResult::err(format!("Duplicate detection failed: {}", e))),
        }
    }
}

// =============================================================================
// merge_duplicates
// =============================================================================

#[derive(Debug, Deserialize)]
struct MergeDuplicatesInput {
    representative_id: String,
    duplicate_ids: Vec<String>,
}

fn merge_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "representative_id": { "type": "string" },
            "duplicate_ids": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["representative_id", "duplicate_ids"]
    })
}

struct MergeDuplicatesTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for MergeDuplicatesTool {
    fn name(&self) -> &str {
        "merge_duplicates"
    }
    fn description(&self) -> &str {
        "Merges duplicate memories into a single consolidated memory"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: MergeDuplicatesInput = parse_input(params)?;
        let representative_id = MemoryId::from(input.representative_id);
        let duplicate_ids: Vec<MemoryId> =
            input.duplicate_ids.into_iter().map(MemoryId::from).collect();

        let detector = self
            .base
            .engine
            .detector(DuplicateDetectionConfig::default());
        match detector.merge(&representative_id, &duplicate_ids).await {
            Ok(outcome) => Ok(ToolResult::ok(json!({
                "merged_memory": {
                    "id": outcome.representative.id,
                    "content": outcome.representative.content,
                    "tags": outcome.representative.tags,
                    "created_at": outcome.representative.created_at,
                },
                "merged_count": duplicate_ids.len() + 1,
                "removed": outcome.removed,
                "failed": outcome.failed,
            }))),
            Err(e) => Ok(ToolResult::err(format!("Merge failed: {}", e))),
        }
    }
}

// =============================================================================
// cluster_memories
// =============================================================================

#[derive(Debug, Deserialize)]
struct ClusterMemoriesInput {
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_min_cluster_size")]
    min_cluster_size: usize,
    #[serde(default = "default_epsilon_distance")]
    epsilon_distance: f32,
    #[serde(default = "default_num_clusters")]
    num_clusters: usize,
}

fn cluster_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "algorithm": { "type": "string" },
            "min_cluster_size": { "type": "integer", "minimum": 1 },
            "epsilon_distance": { "type": "number" },
            "num_clusters": { "type": "integer", "minimum": 1 }
        }
    })
}

struct ClusterMemoriesTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for ClusterMemoriesTool {
    fn name(&self) -> &str {
        "cluster_memories"
    }
    fn description(&self) -> &str {
        "Clusters memories by semantic similarity using DBSCAN or K-means algorithms"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: ClusterMemoriesInput = parse_input(params)?;
        let engine = self.base.engine.clustering(ClusteringConfig {
            algorithm: input.algorithm,
            min_cluster_size: input.min_cluster_size,
            epsilon_distance: input.epsilon_distance,
            num_clusters: input.num_clusters,
            ..Default::default()
        });

        match engine.cluster(&self.base.call_token()).await {
            Ok(clusters) => {
                let total_memories: usize = clusters.iter().map(|c| c.size).sum();
                Ok(ToolResult::ok(json!({
                    "clusters": clusters,
                    "total_clusters": clusters.len(),
                    "total_memories": total_memories,
                })))
            }
            Err(e) => Ok(ToolResult::err(format!("Clustering failed: {}", e))),
        }
    }
}

// =============================================================================
// extract_knowledge
// =============================================================================

#[derive(Debug, Deserialize)]
struct ExtractKnowledgeInput {
    memory_ids: Vec<String>,
}

fn extract_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_ids": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["memory_ids"]
    })
}

struct ExtractKnowledgeTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for ExtractKnowledgeTool {
    fn name(&self) -> &str {
        "extract_knowledge"
    }
    fn description(&self) -> &str {
        "Extracts entities, relationships, concepts, and keywords from memory content to build knowledge graphs"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: ExtractKnowledgeInput = parse_input(params)?;
        let ids: Vec<MemoryId> = input.memory_ids.into_iter().map(MemoryId::from).collect();

        match self.base.engine.extractor().extract_from_memories(&ids).await {
            Ok(graph) => Ok(ToolResult::ok(json!({ "knowledge_graph": graph }))),
            Err(e) => Ok(ToolResult::err(format!("Knowledge extraction failed: {}", e))),
        }
    }
}

// =============================================================================
// find_similar_memories
// =============================================================================

#[derive(Debug, Deserialize)]
struct FindSimilarMemoriesInput {
    memory_id: String,
    #[serde(default = "default_find_similar_threshold")]
    threshold: f32,
}

fn find_similar_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id": { "type": "string" },
            "threshold": { "type": "number" }
        },
        "required": ["memory_id"]
    })
}

struct FindSimilarMemoriesTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for FindSimilarMemoriesTool {
    fn name(&self) -> &str {
        "find_similar_memories"
    }
    fn description(&self) -> &str {
        "Finds memories similar to a given memory using semantic similarity"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: FindSimilarMemoriesInput = parse_input(params)?;
        let id = MemoryId::from(input.memory_id);

        match self
            .base
            .engine
            .find_similar_memories(&id, input.threshold)
            .await
        {
            Ok(similar) => Ok(ToolResult::ok(json!({
                "similar_memories": similar,
                "count": similar.len(),
            }))),
            Err(e) => Ok(ToolResult::err(format!("Similar search failed: {}", e))),
        }
    }
}

// =============================================================================
// get_cluster_details
// =============================================================================

#[derive(Debug, Deserialize)]
struct GetClusterDetailsInput {
    cluster_id: usize,
}

fn cluster_details_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "cluster_id": { "type": "integer", "minimum": 0 }
        },
        "required": ["cluster_id"]
    })
}

struct GetClusterDetailsTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for GetClusterDetailsTool {
    fn name(&self) -> &str {
        "get_cluster_details"
    }
    fn description(&self) -> &str {
        "Retrieves detailed information about a specific memory cluster including its knowledge graph"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: GetClusterDetailsInput = parse_input(params)?;

        match self.base.engine.get_cluster_details(input.cluster_id).await {
            Ok(details) => Ok(ToolResult::ok(json!({ "details": details }))),
            Err(e) => Ok(ToolResult::err(format!("Failed to get cluster details: {}", e))),
        }
    }
}

// =============================================================================
// get_consolidation_stats
// =============================================================================

fn stats_schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

struct GetConsolidationStatsTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for GetConsolidationStatsTool {
    fn name(&self) -> &str {
        "get_consolidation_stats"
    }
    fn description(&self) -> &str {
        "Retrieves statistics about memory consolidation (duplicates, clusters, etc.)"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, _params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        match self.base.engine.statistics().await {
            Ok(stats) => Ok(ToolResult::ok(json!({ "statistics": stats }))),
            Err(e) => Ok(ToolResult::err(format!("Failed to get statistics: {}", e))),
        }
    }
}

// =============================================================================
// compute_similarity
// =============================================================================

#[derive(Debug, Deserialize)]
struct ComputeSimilarityInput {
    memory_id_1: String,
    memory_id_2: String,
}

fn compute_similarity_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id_1": { "type": "string" },
            "memory_id_2": { "type": "string" }
        },
        "required": ["memory_id_1", "memory_id_2"]
    })
}

struct ComputeSimilarityTool {
    base: ToolBase,
}

#[async_trait]
impl McpTool for ComputeSimilarityTool {
    fn name(&self) -> &str {
        "compute_similarity"
    }
    fn description(&self) -> &str {
        "Computes cosine similarity between two memories"
    }
    fn input_schema(&self) -> &Value {
        &self.base.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: ComputeSimilarityInput = parse_input(params)?;
        let id1 = MemoryId::from(input.memory_id_1);
        let id2 = MemoryId::from(input.memory_id_2);

        match self.base.engine.compute_similarity(&id1, &id2).await {
            Ok(similarity) => Ok(ToolResult::ok(json!({
                "memory_id_1": id1,
                "memory_id_2": id2,
                "similarity": similarity,
            }))),
            Err(e) => Ok(ToolResult::err(format!("Similarity computation failed: {}", e))),
        }
    }
}
