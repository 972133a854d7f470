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

//! Repository contract for memory storage

use crate::error::MemoryResult;
use crate::memory::{Memory, MemoryId};
use async_trait::async_trait;

/// Filter for listing memories
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Only memories carrying all of these tags
    pub tags: Vec<String>,

    /// Only memories by this author
    pub author: Option<String>,

    /// Minimum content length in characters
    pub min_content_length: Option<usize>,

    /// Maximum number of results (applied after sorting by creation time)
    pub limit: Option<usize>,
}

impl MemoryFilter {
    /// Whether a memory passes this filter
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(author) = &self.author {
            if &memory.author != author {
                return false;
            }
        }
        if let Some(min_len) = self.min_content_length {
            if memory.content_len() < min_len {
                return false;
            }
        }
        self.tags.iter().all(|t| memory.tags.contains(t))
    }
}

/// Storage contract the consolidation engine works against.
///
/// Implementations must make `update` and `delete` atomic per record;
/// consolidation tolerates partial failure across records but never a
/// half-written record.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// List memories matching the filter, sorted by creation time ascending
    /// (ties broken by id)
    async fn list(&self, filter: &MemoryFilter) -> MemoryResult<Vec<Memory>>;

    /// Fetch a single memory by ID
    async fn get(&self, id: &MemoryId) -> MemoryResult<Memory>;

    /// Store a new memory
    async fn create(&self, memory: Memory) -> MemoryResult<()>;

    /// Replace an existing memory
    async fn update(&self, memory: Memory) -> MemoryResult<()>;

    /// Delete a memory by ID
    async fn delete(&self, id: &MemoryId) -> MemoryResult<()>;

    /// Number of stored memories
    async fn count(&self) -> MemoryResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_tags_and_author() {
        let memory = Memory::new("a note about lifetimes in rust")
            .with_tags(vec!["rust".to_string(), "notes".to_string()])
            .with_author("agent-1");

        let filter = MemoryFilter {
            tags: vec!["rust".to_string()],
            author: Some("agent-1".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&memory));

        let wrong_author = MemoryFilter {
            author: Some("agent-2".to_string()),
            ..Default::default()
        };
        assert!(!wrong_author.matches(&memory));
    }

    #[test]
    fn test_filter_min_content_length() {
        let short = Memory::new("tiny");
        let filter = MemoryFilter {
            min_content_length: Some(20),
            ..Default::default()
        };
        assert!(!filter.matches(&short));
        assert!(filter.matches(&Memory::new("this one is definitely long enough")));
    }
}
