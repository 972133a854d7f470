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

//! Memory consolidation engine.
//!
//! Four cooperating pieces:
//! - [`duplicates`] — transitive near-duplicate grouping over ANN search
//! - [`clustering`] — DBSCAN and K-means over embedding vectors
//! - [`knowledge`] — entity/relationship/concept extraction
//! - [`engine`] — the orchestrator combining them under one policy

pub mod clustering;
pub mod duplicates;
pub mod engine;
pub mod knowledge;

pub use clustering::{Cluster, ClusteringConfig, ClusteringEngine};
pub use duplicates::{
    DuplicateDetectionConfig, DuplicateDetector, DuplicateGroup, MergeOutcome, SimilarMemory,
};
pub use engine::{
    ClusterDetails, ConsolidationEngine, ConsolidationOptions, ConsolidationReport,
    ConsolidationStatistics,
};
pub use knowledge::{Entity, EntityKind, KnowledgeExtractor, KnowledgeGraph, RelationKind, Relationship};
