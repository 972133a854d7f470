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

//! Mnemo Index
//!
//! Embedding and similarity-search layer:
//! - `EmbeddingProvider` trait plus a deterministic hashing provider for
//!   offline and test use
//! - cosine similarity and normalization primitives
//! - an in-memory HNSW index for approximate nearest-neighbor search
//!
//! Indexes here are ephemeral: consolidation builds a fresh one per run
//! from the current repository snapshot.

pub mod embedding;
pub mod error;
pub mod hnsw;
pub mod vector;

pub use embedding::{EmbeddingProvider, HashEmbeddingProvider};
pub use error::{IndexError, IndexResult};
pub use hnsw::{HnswConfig, HnswIndex, SearchResult};
pub use vector::{cosine_similarity, l2_normalize};
