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

//! Memory record type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a memory record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Generate a new random memory ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string ID
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A memory record: a short text artifact captured by an agent or user.
///
/// The embedding is computed lazily by the index layer and is never
/// serialized; the content hash is stable across restarts and is used for
/// cheap exact-duplicate checks before any similarity search runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,

    /// The memory content (natural-language text)
    pub content: String,

    /// Tags for categorization and filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Who recorded this memory (agent name or user handle)
    #[serde(default)]
    pub author: String,

    /// When the memory was created
    pub created_at: DateTime<Utc>,

    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,

    /// Free-form metadata (merge provenance lands here)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Blake3 hash of the content, for exact-duplicate checks
    pub content_hash: String,

    /// Embedding vector, populated on demand by the index layer
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    /// Create a new memory with the given content
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let now = Utc::now();
        let content_hash = Self::compute_hash(&content);
        Self {
            id: MemoryId::new(),
            content,
            tags: Vec::new(),
            author: String::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            content_hash,
            embedding: None,
        }
    }

    /// Set the ID (builder pattern)
    pub fn with_id(mut self, id: impl Into<MemoryId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add tags (builder pattern)
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the author (builder pattern)
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the creation timestamp (builder pattern)
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// Add a metadata entry (builder pattern)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the content, refreshing hash and update time
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = Self::compute_hash(&self.content);
        self.updated_at = Utc::now();
        // Embedding no longer matches the content
        self.embedding = None;
    }

    /// Compute the blake3 hash of a content string
    pub fn compute_hash(content: &str) -> String {
        hex::encode(blake3::hash(content.as_bytes()).as_bytes())
    }

    /// Whether this memory has the same content as another
    pub fn is_exact_duplicate_of(&self, other: &Memory) -> bool {
        self.content_hash == other.content_hash
    }

    /// Character length of the content
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}
