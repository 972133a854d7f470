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

//! Knowledge graph extraction from memory content.
//!
//! Heuristic, precision-over-recall: capitalized phrases with suffix cues,
//! URL/email patterns, sentence-level co-occurrence for relationships, and
//! stop-word-filtered term frequencies for concepts. Graphs from multiple
//! memories merge by normalized entity name with counts summed.

use mnemo_core::{MemoryError, MemoryId, MemoryRepository, MemoryResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Number of keywords retained per graph
const KEYWORD_LIMIT: usize = 10;

/// Minimum token length considered for concepts
const MIN_TOKEN_LENGTH: usize = 3;

/// Kind of an extracted entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Organization,
    Location,
    Url,
    Email,
    Concept,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Organization => "organization",
            EntityKind::Location => "location",
            EntityKind::Url => "url",
            EntityKind::Email => "email",
            EntityKind::Concept => "concept",
        }
    }
}

/// Kind of a relationship between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    AssociatedWith,
    Founded,
    WorksAt,
    Uses,
    DependsOn,
    Acquired,
    Leads,
}

impl RelationKind {
    /// Relationship implied by a connecting verb phrase, if any
    fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "founded" => Some(RelationKind::Founded),
            "works at" => Some(RelationKind::WorksAt),
            "uses" => Some(RelationKind::Uses),
            "depends on" => Some(RelationKind::DependsOn),
            "acquired" => Some(RelationKind::Acquired),
            "leads" => Some(RelationKind::Leads),
            _ => None,
        }
    }

    const VERBS: [&'static str; 6] =
        ["founded", "works at", "uses", "depends on", "acquired", "leads"];
}

/// An extracted named entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub mention_count: usize,
}

/// A relationship between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
    pub evidence_count: usize,
}

/// Knowledge extracted from one or more memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    /// Term → frequency, stop-word filtered, frequency > 1
    pub concepts: HashMap<String, usize>,
    /// Top concepts by frequency
    pub keywords: Vec<String>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.concepts.is_empty()
    }

    /// Merge another graph into this one. Entities and relationships unify
    /// by normalized name with counts summed; keywords are re-ranked over
    /// the merged concept table.
    pub fn merge(&mut self, other: KnowledgeGraph) {
        let mut entities: HashMap<(String, EntityKind), Entity> = self
            .entities
            .drain(..)
            .map(|e| ((normalize_name(&e.name), e.kind), e))
            .collect();
        for entity in other.entities {
            let key = (normalize_name(&entity.name), entity.kind);
            entities
                .entry(key)
                .and_modify(|e| e.mention_count += entity.mention_count)
                .or_insert(entity);
        }
        self.entities = entities.into_values().collect();
        sort_entities(&mut self.entities);

        let mut relationships: HashMap<(String, String, RelationKind), Relationship> = self
            .relationships
            .drain(..)
            .map(|r| {
                (
                    (normalize_name(&r.source), normalize_name(&r.target), r.kind),
                    r,
                )
            })
            .collect();
        for rel in other.relationships {
            let key = (normalize_name(&rel.source), normalize_name(&rel.target), rel.kind);
            relationships
                .entry(key)
                .and_modify(|r| r.evidence_count += rel.evidence_count)
                .or_insert(rel);
        }
        self.relationships = relationships.into_values().collect();
        sort_relationships(&mut self.relationships);

        for (term, count) in other.concepts {
            *self.concepts.entry(term).or_insert(0) += count;
        }
        self.keywords = rank_keywords(&self.concepts);
    }
}

/// Extracts knowledge graphs from stored memories
pub struct KnowledgeExtractor {
    repository: Arc<dyn MemoryRepository>,
    proper_noun: Regex,
    url: Regex,
    email: Regex,
}

impl KnowledgeExtractor {
    pub fn new(repository: Arc<dyn MemoryRepository>) -> Self {
        Self {
            repository,
            proper_noun: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*(?:\s+(?:Inc|Corp|Ltd)\.?)?")
                .expect("static regex"),
            url: Regex::new(r"https?://[^\s]+").expect("static regex"),
            email: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
                .expect("static regex"),
        }
    }

    /// Extract a merged knowledge graph from the given memories.
    /// Every id must resolve; resolution happens before any extraction.
    pub async fn extract_from_memories(&self, ids: &[MemoryId]) -> MemoryResult<KnowledgeGraph> {
        if ids.is_empty() {
            return Err(MemoryError::Validation(
                "memory_ids must not be empty".to_string(),
            ));
        }

        let mut contents = Vec::with_capacity(ids.len());
        for id in ids {
            let memory = self.repository.get(id).await?;
            contents.push(memory.content);
        }

        let mut graph = KnowledgeGraph::default();
        for content in &contents {
            graph.merge(self.extract_from_content(content));
        }
        Ok(graph)
    }

    /// Extract a knowledge graph from raw text
    pub fn extract_from_content(&self, content: &str) -> KnowledgeGraph {
        let mut entities = self.extract_entities(content);
        // Sorted before pairing so relationship direction is stable
        sort_entities(&mut entities);
        let mut relationships = self.extract_relationships(content, &entities);
        sort_relationships(&mut relationships);
        let concepts = extract_concepts(content);
        let keywords = rank_keywords(&concepts);

        KnowledgeGraph {
            entities,
            relationships,
            concepts,
            keywords,
        }
    }

    fn extract_entities(&self, content: &str) -> Vec<Entity> {
        let mut entities: HashMap<(String, EntityKind), Entity> = HashMap::new();

        let mut add = |name: &str, kind: EntityKind| {
            let key = (normalize_name(name), kind);
            entities
                .entry(key)
                .and_modify(|e| e.mention_count += 1)
                .or_insert_with(|| Entity {
                    name: name.to_string(),
                    kind,
                    mention_count: 1,
                });
        };

        for m in self.proper_noun.find_iter(content) {
            let phrase = m.as_str().trim().trim_end_matches('.');
            if is_common_word(phrase) {
                continue;
            }
            add(phrase, infer_entity_kind(phrase));
        }
        for m in self.url.find_iter(content) {
            add(m.as_str().trim_end_matches(['.', ',']), EntityKind::Url);
        }
        for m in self.email.find_iter(content) {
            add(m.as_str(), EntityKind::Email);
        }

        entities.into_values().collect()
    }

    /// Entities co-occurring within one sentence are linked; a connecting
    /// verb phrase upgrades the relationship kind.
    fn extract_relationships(&self, content: &str, entities: &[Entity]) -> Vec<Relationship> {
        let mut relationships: HashMap<(String, String, RelationKind), Relationship> =
            HashMap::new();

        // Abbreviation periods would otherwise split "Apple Inc. was..."
        // into two sentences
        let content = content
            .replace("Inc.", "Inc")
            .replace("Corp.", "Corp")
            .replace("Ltd.", "Ltd");

        for sentence in content.split(['.', '!', '?']) {
            let present: Vec<&Entity> = entities
                .iter()
                .filter(|e| {
                    !matches!(e.kind, EntityKind::Url | EntityKind::Email)
                        && sentence.contains(e.name.as_str())
                })
                .collect();

            for (a, source) in present.iter().enumerate() {
                for target in present.iter().skip(a + 1) {
                    let kind = connecting_verb(sentence, &source.name, &target.name)
                        .unwrap_or(RelationKind::AssociatedWith);
                    let key = (
                        normalize_name(&source.name),
                        normalize_name(&target.name),
                        kind,
                    );
                    relationships
                        .entry(key)
                        .and_modify(|r| r.evidence_count += 1)
                        .or_insert_with(|| Relationship {
                            source: source.name.clone(),
                            target: target.name.clone(),
                            kind,
                            evidence_count: 1,
                        });
                }
            }
        }

        relationships.into_values().collect()
    }
}

/// Verb phrase between two entity mentions, if one of the known verbs
/// appears in the text separating them
fn connecting_verb(sentence: &str, source: &str, target: &str) -> Option<RelationKind> {
    let si = sentence.find(source)?;
    let ti = sentence.find(target)?;
    let (start, end) = if si < ti {
        (si + source.len(), ti)
    } else {
        (ti + target.len(), si)
    };
    let between = sentence.get(start..end)?.to_lowercase();
    RelationKind::VERBS
        .iter()
        .find(|verb| between.contains(*verb))
        .and_then(|verb| RelationKind::from_verb(verb))
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn infer_entity_kind(phrase: &str) -> EntityKind {
    let lower = phrase.to_lowercase();
    if lower.ends_with(" inc") || lower.ends_with(" corp") || lower.ends_with(" ltd") {
        return EntityKind::Organization;
    }
    for cue in ["city", "country", "state", "province"] {
        if lower.contains(cue) {
            return EntityKind::Location;
        }
    }
    if phrase.split_whitespace().count() >= 2 {
        return EntityKind::Person;
    }
    EntityKind::Concept
}

fn is_common_word(word: &str) -> bool {
    const COMMON: [&str; 31] = [
        "The", "This", "That", "These", "Those", "I", "You", "He", "She", "It", "We", "They",
        "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "January",
        "February", "March", "April", "May", "June", "July", "August", "September", "October",
        "November", "December",
    ];
    COMMON.contains(&word)
}

fn is_stop_word(word: &str) -> bool {
    const STOP_WORDS: [&str; 121] = [
        "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
        "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
        "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
        "what", "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when",
        "make", "can", "like", "time", "no", "just", "him", "know", "take", "into", "year",
        "your", "good", "some", "could", "them", "see", "other", "than", "then", "now", "look",
        "only", "come", "its", "over", "think", "also", "back", "after", "use", "two", "how",
        "our", "work", "first", "well", "way", "even", "new", "want", "because", "any", "these",
        "give", "day", "most", "us", "is", "was", "are", "been", "has", "had", "were", "said",
        "did", "having", "may", "should", "might", "down", "each", "such", "very", "too", "own",
        "same", "those", "both",
    ];
    STOP_WORDS.contains(&word)
}

/// Stop-word-filtered lowercase terms with frequency greater than one
fn extract_concepts(content: &str) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in content.split_whitespace() {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() < MIN_TOKEN_LENGTH || is_stop_word(&cleaned) {
            continue;
        }
        *counts.entry(cleaned).or_insert(0) += 1;
    }
    counts.retain(|_, count| *count > 1);
    counts
}

/// Top concepts by frequency, ties broken alphabetically
fn rank_keywords(concepts: &HashMap<String, usize>) -> Vec<String> {
    let mut ranked: Vec<(&String, &usize)> = concepts.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(KEYWORD_LIMIT)
        .map(|(term, _)| term.clone())
        .collect()
}

fn sort_entities(entities: &mut [Entity]) {
    entities.sort_by(|a, b| {
        b.mention_count
            .cmp(&a.mention_count)
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn sort_relationships(relationships: &mut [Relationship]) {
    relationships.sort_by(|a, b| {
        b.evidence_count
            .cmp(&a.evidence_count)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.target.cmp(&b.target))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRepository;

    fn extractor() -> KnowledgeExtractor {
        KnowledgeExtractor::new(Arc::new(InMemoryRepository::new()))
    }

    #[test]
    fn test_extracts_entities_from_sentence() {
        let graph = extractor()
            .extract_from_content("Apple Inc. was founded by Steve Jobs in California.");

        assert!(!graph.is_empty());
        let names: Vec<&str> = graph.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.iter().any(|n| n.contains("Apple")));
        assert!(names.contains(&"Steve Jobs"));
        assert!(names.contains(&"California"));

        let apple = graph
            .entities
            .iter()
            .find(|e| e.name.contains("Apple"))
            .unwrap();
        assert_eq!(apple.kind, EntityKind::Organization);
        let jobs = graph
            .entities
            .iter()
            .find(|e| e.name == "Steve Jobs")
            .unwrap();
        assert_eq!(jobs.kind, EntityKind::Person);
    }

    #[test]
    fn test_founded_relationship_detected() {
        let graph = extractor()
            .extract_from_content("Apple Inc. was founded by Steve Jobs in California.");
        assert!(graph
            .relationships
            .iter()
            .any(|r| r.kind == RelationKind::Founded));
    }

    #[test]
    fn test_url_and_email_entities() {
        let graph = extractor().extract_from_content(
            "Docs live at https://docs.example.com and support is help@example.com",
        );
        assert!(graph
            .entities
            .iter()
            .any(|e| e.kind == EntityKind::Url && e.name.starts_with("https://")));
        assert!(graph
            .entities
            .iter()
            .any(|e| e.kind == EntityKind::Email && e.name == "help@example.com"));
    }

    #[test]
    fn test_common_words_skipped() {
        let graph = extractor().extract_from_content("The meeting is on Monday in January.");
        assert!(!graph
            .entities
            .iter()
            .any(|e| e.name == "Monday" || e.name == "January" || e.name == "The"));
    }

    #[test]
    fn test_concepts_require_repeat_mentions() {
        let graph = extractor().extract_from_content(
            "database migrations and database backups need database discipline once",
        );
        assert_eq!(graph.concepts.get("database"), Some(&3));
        assert!(!graph.concepts.contains_key("once"));
        assert_eq!(graph.keywords.first().map(String::as_str), Some("database"));
    }

    #[test]
    fn test_merge_sums_counts() {
        let ex = extractor();
        let mut a = ex.extract_from_content("Steve Jobs founded Apple Inc. Steve Jobs led design.");
        let b = ex.extract_from_content("Steve Jobs returned to Apple Inc.");
        let before = a
            .entities
            .iter()
            .find(|e| e.name == "Steve Jobs")
            .unwrap()
            .mention_count;
        a.merge(b);
        let after = a
            .entities
            .iter()
            .find(|e| e.name == "Steve Jobs")
            .unwrap()
            .mention_count;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let err = extractor().extract_from_memories(&[]).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found() {
        let err = extractor()
            .extract_from_memories(&["ghost".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }
}
