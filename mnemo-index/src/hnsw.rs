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

//! In-memory HNSW index for cosine-similarity search.
//!
//! Hierarchical navigable small world graph: inserts sample a top layer
//! from a geometric distribution, search descends greedily through the
//! upper layers and runs a beam search (`ef_search`) on layer 0. Level
//! sampling uses a seeded RNG so index construction and search results
//! are reproducible for the same insertion order.

use crate::error::{IndexError, IndexResult};
use crate::vector::cosine_similarity;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// HNSW construction parameters
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Max neighbors per node on layers above 0 (layer 0 keeps `2 * m`)
    pub m: usize,
    /// Beam width during construction
    pub ef_construction: usize,
    /// Beam width during search
    pub ef_search: usize,
    /// RNG seed for level sampling
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            seed: 0x6d6e656d6f,
        }
    }
}

/// A search hit: the stored key and its cosine similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub key: String,
    pub similarity: f32,
}

struct Node {
    key: String,
    vector: Vec<f32>,
    /// neighbors[layer] = node indices linked at that layer
    neighbors: Vec<Vec<usize>>,
}

/// Candidate ordered by distance, max-heap on closeness via `Reverse`-style
/// wrapper semantics.
#[derive(PartialEq)]
struct Candidate {
    dist: f32,
    idx: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Smaller distance = greater priority
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Furthest-first ordering for the result set
#[derive(PartialEq)]
struct FarCandidate {
    dist: f32,
    idx: usize,
}

impl Eq for FarCandidate {}

impl PartialOrd for FarCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FarCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    nodes: Vec<Node>,
    entry_point: Option<usize>,
    max_layer: usize,
    rng: StdRng,
    level_norm: f64,
}

impl HnswIndex {
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        let level_norm = 1.0 / (config.m.max(2) as f64).ln();
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            dimension,
            nodes: Vec::new(),
            entry_point: None,
            max_layer: 0,
            rng,
            level_norm,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        1.0 - cosine_similarity(a, b)
    }

    fn sample_level(&mut self) -> usize {
        let r: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        ((-r.ln() * self.level_norm) as usize).min(16)
    }

    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    /// Beam search on a single layer, returning up to `ef` closest node
    /// indices with distances, sorted closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry: usize,
        ef: usize,
        layer: usize,
    ) -> Vec<(usize, f32)> {
        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(entry);

        let entry_dist = self.distance(query, &self.nodes[entry].vector);
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        candidates.push(Candidate {
            dist: entry_dist,
            idx: entry,
        });
        let mut results: BinaryHeap<FarCandidate> = BinaryHeap::new();
        results.push(FarCandidate {
            dist: entry_dist,
            idx: entry,
        });

        while let Some(current) = candidates.pop() {
            let furthest = results.peek().map(|f| f.dist).unwrap_or(f32::MAX);
            if current.dist > furthest && results.len() >= ef {
                break;
            }

            for &neighbor in &self.nodes[current.idx].neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.distance(query, &self.nodes[neighbor].vector);
                let furthest = results.peek().map(|f| f.dist).unwrap_or(f32::MAX);
                if results.len() < ef || dist < furthest {
                    candidates.push(Candidate { dist, idx: neighbor });
                    results.push(FarCandidate { dist, idx: neighbor });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(usize, f32)> =
            results.into_iter().map(|c| (c.idx, c.dist)).collect();
        out.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }

    /// Insert a vector under a key. Keys are not deduplicated; callers
    /// insert each memory exactly once per run.
    pub fn insert(&mut self, key: impl Into<String>, vector: Vec<f32>) -> IndexResult<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let level = self.sample_level();
        let idx = self.nodes.len();
        self.nodes.push(Node {
            key: key.into(),
            vector,
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(idx);
            self.max_layer = level;
            return Ok(());
        };

        let query = self.nodes[idx].vector.clone();

        // Greedy descent through layers above the new node's level
        let mut layer = self.max_layer;
        while layer > level {
            entry = self
                .search_layer(&query, entry, 1, layer)
                .first()
                .map(|&(i, _)| i)
                .unwrap_or(entry);
            layer -= 1;
        }

        // Connect on each layer from min(level, max_layer) down to 0
        for layer in (0..=level.min(self.max_layer)).rev() {
            let found = self.search_layer(&query, entry, self.config.ef_construction, layer);
            let selected: Vec<usize> = found
                .iter()
                .take(self.max_neighbors(layer))
                .map(|&(i, _)| i)
                .collect();

            for &neighbor in &selected {
                self.nodes[idx].neighbors[layer].push(neighbor);
                self.nodes[neighbor].neighbors[layer].push(idx);
                self.prune_neighbors(neighbor, layer);
            }

            if let Some(&(closest, _)) = found.first() {
                entry = closest;
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(idx);
        }
        Ok(())
    }

    /// Keep only the closest `max_neighbors(layer)` links of a node
    fn prune_neighbors(&mut self, node: usize, layer: usize) {
        let max = self.max_neighbors(layer);
        if self.nodes[node].neighbors[layer].len() <= max {
            return;
        }
        let base = self.nodes[node].vector.clone();
        let mut links: Vec<(usize, f32)> = self.nodes[node].neighbors[layer]
            .iter()
            .map(|&n| (n, self.distance(&base, &self.nodes[n].vector)))
            .collect();
        links.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        links.truncate(max);
        self.nodes[node].neighbors[layer] = links.into_iter().map(|(n, _)| n).collect();
    }

    /// Find the `k` nearest stored vectors, most similar first.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let Some(mut entry) = self.entry_point else {
            return Ok(Vec::new());
        };

        let mut layer = self.max_layer;
        while layer > 0 {
            entry = self
                .search_layer(query, entry, 1, layer)
                .first()
                .map(|&(i, _)| i)
                .unwrap_or(entry);
            layer -= 1;
        }

        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(query, entry, ef, 0);
        Ok(found
            .into_iter()
            .take(k)
            .map(|(i, dist)| SearchResult {
                key: self.nodes[i].key.clone(),
                similarity: 1.0 - dist,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        crate::vector::l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_empty_index_search() {
        let index = HnswIndex::new(4, HnswConfig::default());
        assert!(index.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = HnswIndex::new(4, HnswConfig::default());
        assert!(index.insert("a", vec![1.0; 3]).is_err());
        index.insert("a", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[1.0; 3], 1).is_err());
    }

    #[test]
    fn test_nearest_neighbor_exact() {
        let mut index = HnswIndex::new(3, HnswConfig::default());
        index.insert("x", unit(&[1.0, 0.0, 0.0])).unwrap();
        index.insert("y", unit(&[0.0, 1.0, 0.0])).unwrap();
        index.insert("z", unit(&[0.0, 0.0, 1.0])).unwrap();
        index.insert("xy", unit(&[1.0, 1.0, 0.0])).unwrap();

        let results = index.search(&unit(&[0.9, 0.1, 0.0]), 2).unwrap();
        assert_eq!(results[0].key, "x");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[test]
    fn test_identical_vectors_score_one() {
        let mut index = HnswIndex::new(3, HnswConfig::default());
        let v = unit(&[0.2, 0.5, 0.8]);
        index.insert("a", v.clone()).unwrap();
        let results = index.search(&v, 1).unwrap();
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic_construction() {
        let build = || {
            let mut index = HnswIndex::new(8, HnswConfig::default());
            for i in 0..50 {
                let mut v = vec![0.0f32; 8];
                v[i % 8] = 1.0;
                v[(i * 3) % 8] += 0.5;
                crate::vector::l2_normalize(&mut v);
                index.insert(format!("m{i}"), v).unwrap();
            }
            index
                .search(&unit(&[1.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]), 5)
                .unwrap()
                .into_iter()
                .map(|r| r.key)
                .collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_recall_on_small_set() {
        // With ef >= n the beam search is exhaustive on layer 0
        let mut index = HnswIndex::new(4, HnswConfig::default());
        for i in 0..20 {
            let angle = i as f32 * 0.3;
            index
                .insert(format!("m{i}"), unit(&[angle.cos(), angle.sin(), 0.1, 0.0]))
                .unwrap();
        }
        let results = index.search(&unit(&[1.0, 0.0, 0.1, 0.0]), 20).unwrap();
        assert_eq!(results.len(), 20);
        assert_eq!(results[0].key, "m0");
    }
}
