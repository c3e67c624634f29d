//! In-memory [`SimilarityBackend`] and [`GraphBackend`] implementations.
//!
//! Both use `std::sync::RwLock` for thread safety. Similarity scoring is
//! query-term coverage: the fraction of distinct, non-stop-word query terms
//! that occur in a document, so scores fall in `[0.0, 1.0]`. The graph is
//! an undirected adjacency view over the loaded triplets, traversed
//! breadth-first.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{KnowledgeError, Result};
use crate::models::{Entity, GraphNode, RelationTriplet, RetrievalDocument, ScoredDocument};

use super::{GraphBackend, SimilarityBackend};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "why", "with", "you",
];

/// Lowercased terms of `text`, stop words removed.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || matches!(c, '.' | '_' | '-')))
        .map(|t| t.trim_matches(|c: char| matches!(c, '.' | '_' | '-')))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn poisoned(backend: &str) -> KnowledgeError {
    KnowledgeError::unreachable(backend, "lock poisoned")
}

struct StoredDoc {
    collection: String,
    doc: RetrievalDocument,
    terms: HashSet<String>,
}

/// In-memory similarity store for the CLI and tests.
pub struct InMemorySimilarityStore {
    docs: RwLock<HashMap<String, StoredDoc>>,
}

impl InMemorySimilarityStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct collections holding at least one document.
    pub fn collections(&self) -> BTreeSet<String> {
        self.docs
            .read()
            .map(|d| d.values().map(|s| s.collection.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemorySimilarityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityBackend for InMemorySimilarityStore {
    fn name(&self) -> &str {
        "memory-similarity"
    }

    async fn upsert(&self, collection: &str, documents: &[RetrievalDocument]) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| poisoned(self.name()))?;
        for doc in documents {
            let mut indexed = terms(&doc.content);
            if let Some(title) = doc.title() {
                indexed.extend(terms(title));
            }
            docs.insert(
                doc.id.clone(),
                StoredDoc {
                    collection: collection.to_string(),
                    doc: doc.clone(),
                    terms: indexed,
                },
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        query_text: &str,
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<ScoredDocument>> {
        let query_terms = terms(query_text);
        if query_terms.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        let docs = self.docs.read().map_err(|_| poisoned(self.name()))?;
        let total = query_terms.len() as f64;

        let mut hits: Vec<ScoredDocument> = docs
            .values()
            .filter_map(|stored| {
                let matched = query_terms
                    .iter()
                    .filter(|t| stored.terms.contains(*t))
                    .count();
                let score = matched as f64 / total;
                (matched > 0 && score >= min_score).then(|| ScoredDocument {
                    document: stored.doc.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(max_results);
        Ok(hits)
    }
}

#[derive(Default)]
struct GraphState {
    /// Node name → labels gathered from `is_a` edges.
    nodes: BTreeMap<String, BTreeSet<String>>,
    edges: BTreeSet<(String, String, String)>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

/// In-memory relation graph for the CLI and tests.
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.state.read().map(|s| s.nodes.len()).unwrap_or(0)
    }

    /// Distinct edges; identical triplets collapse into one.
    pub fn edge_count(&self) -> usize {
        self.state.read().map(|s| s.edges.len()).unwrap_or(0)
    }
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// `needle` occurs in `haystack` with no token character on either side.
fn contains_token(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        !before.is_some_and(is_token_char) && !after.is_some_and(is_token_char)
    })
}

/// Nodes whose name contains an entity value, or appears as a whole token
/// inside one (`evil.com` inside `http://evil.com/x`).
fn seeds_for(nodes: &BTreeMap<String, BTreeSet<String>>, entities: &[Entity]) -> Vec<String> {
    let values: Vec<String> = entities.iter().map(|e| e.value.to_lowercase()).collect();
    nodes
        .keys()
        .filter(|name| {
            let lower = name.to_lowercase();
            values.iter().any(|v| {
                lower.contains(v.as_str()) || (lower.len() >= 3 && contains_token(v, &lower))
            })
        })
        .cloned()
        .collect()
}

#[async_trait]
impl GraphBackend for InMemoryGraph {
    fn name(&self) -> &str {
        "memory-graph"
    }

    async fn create_from_triplets(&self, triplets: &[RelationTriplet]) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| poisoned(self.name()))?;
        let mut changed = false;
        for t in triplets {
            let edge = (t.subject.clone(), t.predicate.clone(), t.object.clone());
            if !state.edges.insert(edge) {
                continue;
            }
            changed = true;
            state.nodes.entry(t.subject.clone()).or_default();
            state.nodes.entry(t.object.clone()).or_default();
            if t.predicate == "is_a" {
                if let Some(labels) = state.nodes.get_mut(&t.subject) {
                    labels.insert(t.object.clone());
                }
            }
            state
                .adjacency
                .entry(t.subject.clone())
                .or_default()
                .insert(t.object.clone());
            state
                .adjacency
                .entry(t.object.clone())
                .or_default()
                .insert(t.subject.clone());
        }
        Ok(changed)
    }

    async fn expand(
        &self,
        entities: &[Entity],
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Vec<GraphNode>> {
        if entities.is_empty() || max_nodes == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.read().map_err(|_| poisoned(self.name()))?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        for seed in seeds_for(&state.nodes, entities) {
            if visited.insert(seed.clone()) {
                queue.push_back((seed, 0));
            }
        }

        let mut out = Vec::new();
        while let Some((name, depth)) = queue.pop_front() {
            if out.len() >= max_nodes {
                break;
            }
            let labels = state
                .nodes
                .get(&name)
                .filter(|l| !l.is_empty())
                .map(|l| l.iter().cloned().collect())
                .unwrap_or_else(|| vec!["Entity".to_string()]);
            let mut properties = BTreeMap::new();
            properties.insert("name".to_string(), name.clone());
            properties.insert("depth".to_string(), depth.to_string());
            out.push(GraphNode {
                id: name.clone(),
                labels,
                properties,
            });

            if depth >= max_depth {
                continue;
            }
            if let Some(neighbours) = state.adjacency.get(&name) {
                for next in neighbours {
                    if visited.insert(next.clone()) {
                        queue.push_back((next.clone(), depth + 1));
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;

    fn doc(id: &str, content: &str) -> RetrievalDocument {
        RetrievalDocument::new(id, content)
    }

    #[tokio::test]
    async fn test_search_ranks_by_coverage() {
        let store = InMemorySimilarityStore::new();
        store
            .upsert(
                "guides",
                &[
                    doc("a", "SQL injection bypasses login forms"),
                    doc("b", "injection of commands"),
                    doc("c", "unrelated network notes"),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("sql injection", 7, 0.0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "a");
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);
        assert!((hits[1].score - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_search_threshold_and_limit() {
        let store = InMemorySimilarityStore::new();
        store
            .upsert("c", &[doc("a", "sql injection"), doc("b", "sql only"), doc("d", "sql injection again")])
            .await
            .unwrap();
        let hits = store.search("sql injection", 1, 0.7).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "a");
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemorySimilarityStore::new();
        store.upsert("c", &[doc("a", "old text")]).await.unwrap();
        store.upsert("c", &[doc("a", "new text")]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.search("old", 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_word_query_is_empty() {
        let store = InMemorySimilarityStore::new();
        store.upsert("c", &[doc("a", "the lab")]).await.unwrap();
        assert!(store.search("the", 5, 0.0).await.unwrap().is_empty());
    }

    fn triplet(s: &str, p: &str, o: &str) -> RelationTriplet {
        RelationTriplet::new(s, p, o, 1.0, "test")
    }

    #[tokio::test]
    async fn test_graph_dedups_identical_triplets() {
        let graph = InMemoryGraph::new();
        let changed = graph
            .create_from_triplets(&[triplet("a", "p", "b"), triplet("a", "p", "b")])
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(graph.edge_count(), 1);
        let changed = graph.create_from_triplets(&[triplet("a", "p", "b")]).await.unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_expand_bfs_depth_and_labels() {
        let graph = InMemoryGraph::new();
        graph
            .create_from_triplets(&[
                triplet("192.168.1.100", "is_a", "host"),
                triplet("192.168.1.100", "runs", "apache"),
                triplet("apache", "vulnerable_to", "CVE-2021-41773"),
                triplet("CVE-2021-41773", "exploited_by", "path traversal"),
            ])
            .await
            .unwrap();

        let entities = vec![Entity::new(EntityKind::IpAddress, "192.168.1.100")];
        let nodes = graph.expand(&entities, 1, 50).await.unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name()).collect();
        assert_eq!(names[0], "192.168.1.100");
        assert_eq!(nodes[0].render(), "host: 192.168.1.100");
        assert!(names.contains(&"apache"));
        assert!(!names.contains(&"CVE-2021-41773"));

        let nodes = graph.expand(&entities, 3, 50).await.unwrap();
        assert!(nodes.iter().any(|n| n.name() == "path traversal"));

        let nodes = graph.expand(&entities, 3, 2).await.unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_expand_without_match_is_empty() {
        let graph = InMemoryGraph::new();
        graph.create_from_triplets(&[triplet("a", "p", "b")]).await.unwrap();
        let entities = vec![Entity::new(EntityKind::Port, "4444")];
        assert!(graph.expand(&entities, 3, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seed_needs_whole_token_inside_entity() {
        let graph = InMemoryGraph::new();
        graph
            .create_from_triplets(&[
                triplet("john", "is_a", "tool"),
                triplet("john", "used_for", "Brute Force"),
                triplet("evil.com", "is_a", "domain"),
            ])
            .await
            .unwrap();

        let names = |nodes: Vec<GraphNode>| -> Vec<String> {
            nodes.iter().map(|n| n.name().to_string()).collect()
        };
        for url in ["http://johnsmith.com/index.html", "http://10.0.0.9/john.txt"] {
            let entities = vec![Entity::new(EntityKind::Url, url)];
            let seeded = names(graph.expand(&entities, 0, 10).await.unwrap());
            assert!(!seeded.contains(&"john".to_string()), "{} seeded {:?}", url, seeded);
        }

        let entities = vec![Entity::new(EntityKind::Url, "http://evil.com/tools/john")];
        let seeded = names(graph.expand(&entities, 0, 10).await.unwrap());
        assert!(seeded.contains(&"john".to_string()));
        assert!(seeded.contains(&"evil.com".to_string()));
        assert!(!seeded.contains(&"Brute Force".to_string()));
    }
}
