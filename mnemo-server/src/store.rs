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

//! In-memory repository backed by a concurrent map

use async_trait::async_trait;
use dashmap::DashMap;
use mnemo_core::{Memory, MemoryError, MemoryFilter, MemoryId, MemoryRepository, MemoryResult};

/// In-memory `MemoryRepository`. DashMap entry locking gives per-record
/// write serialization; reads return clones so no lock is held across a
/// consolidation run.
#[derive(Default)]
pub struct InMemoryRepository {
    memories: DashMap<MemoryId, Memory>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            memories: DashMap::new(),
        }
    }
}

#[async_trait]
impl MemoryRepository for InMemoryRepository {
    async fn list(&self, filter: &MemoryFilter) -> MemoryResult<Vec<Memory>> {
        let mut results: Vec<Memory> = self
            .memories
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        results.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn get(&self, id: &MemoryId) -> MemoryResult<Memory> {
        self.memories
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    async fn create(&self, memory: Memory) -> MemoryResult<()> {
        if self.memories.contains_key(&memory.id) {
            return Err(MemoryError::Storage(format!(
                "memory {} already exists",
                memory.id
            )));
        }
        self.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn update(&self, memory: Memory) -> MemoryResult<()> {
        match self.memories.entry(memory.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.insert(memory);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(_) => {
                Err(MemoryError::NotFound(memory.id.to_string()))
            }
        }
    }

    async fn delete(&self, id: &MemoryId) -> MemoryResult<()> {
        self.memories
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    async fn count(&self) -> MemoryResult<usize> {
        Ok(self.memories.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_delete() {
        let repo = InMemoryRepository::new();
        let memory = Memory::new("remember this for later use");
        let id = memory.id.clone();

        repo.create(memory).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);

        let fetched = repo.get(&id).await.unwrap();
        assert_eq!(fetched.content, "remember this for later use");

        repo.delete(&id).await.unwrap();
        assert!(matches!(
            repo.get(&id).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let repo = InMemoryRepository::new();
        let memory = Memory::new("only one of these allowed");
        repo.create(memory.clone()).await.unwrap();
        assert!(repo.create(memory).await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = InMemoryRepository::new();
        let memory = Memory::new("never stored");
        assert!(matches!(
            repo.update(memory).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_and_limited() {
        let repo = InMemoryRepository::new();
        let base = chrono::Utc::now();
        for i in 0..5 {
            let memory = Memory::new(format!("memory number {i} with enough text"))
                .with_id(format!("m{i}"))
                .with_created_at(base + chrono::Duration::seconds(i));
            repo.create(memory).await.unwrap();
        }

        let all = repo.list(&MemoryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].id.as_str(), "m0");
        assert_eq!(all[4].id.as_str(), "m4");

        let limited = repo
            .list(&MemoryFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].id.as_str(), "m1");
    }
}
