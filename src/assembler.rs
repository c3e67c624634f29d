//! Context assembly: one bounded, attributed context block per query.
//!
//! # Pipeline
//!
//! 1. **Entities**: typed values (IPs, URLs, hashes, file names, ports,
//!    emails) are pulled from the raw query.
//! 2. **Graph expansion**: when entities were found, the graph backend
//!    returns nodes within `max_context_depth` hops, capped at
//!    `max_context_nodes`. Each node renders as `"<labels>: <name>"`.
//! 3. **Similarity retrieval**: the raw query is searched with
//!    `max_results` and `similarity_threshold`.
//! 4. **Merge**: graph findings first, then retrieved documents, each under
//!    its own provenance label.
//! 5. **Truncate** to the length budget with the section → sentence → word
//!    fallback chain. A label or list marker left without content is
//!    dropped, and attributions only count items whose first line survived.
//! 6. **Cache** the result per (normalized query, entity set, budget).
//!
//! Backend calls are bounded by `backend_timeout_secs`. A failing or slow
//! backend empties its own section and is logged; nothing propagates to the
//! caller, whose worst case is an empty string. Results produced while a
//! backend was failing are not cached.

use knowledge_harness_core::backend::{GraphBackend, SimilarityBackend};
use knowledge_harness_core::entities::extract_entities;
use knowledge_harness_core::models::{
    Attribution, ContextResult, Entity, GraphNode, Provenance, ScoredDocument,
};
use knowledge_harness_core::truncate::truncate_with_fallback_marker;
use knowledge_harness_core::{KnowledgeError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;

/// Run a backend call under `timeout`; elapsing counts as unreachable.
pub(crate) async fn call_backend<T, F>(backend: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(KnowledgeError::unreachable(
            backend,
            format!("timed out after {:?}", timeout),
        )),
    }
}

/// Per-call overrides. `None` falls back to the retrieval config.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub max_length: Option<usize>,
    pub include_graph: bool,
    pub include_similarity: bool,
    pub max_results: Option<usize>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_length: None,
            include_graph: true,
            include_similarity: true,
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    entities: Vec<Entity>,
    max_length: usize,
    max_results: usize,
    include_graph: bool,
    include_similarity: bool,
}

/// Lowercase and collapse whitespace.
fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

const SECTION_SEPARATOR: &str = "\n\n";

struct Section {
    provenance: Provenance,
    body: String,
    /// Per item: attribution source and end offset of its first line in `body`.
    items: Vec<(String, usize)>,
}

impl Section {
    fn new(provenance: Provenance) -> Self {
        Self {
            provenance,
            body: String::new(),
            items: Vec::new(),
        }
    }

    fn push_item(&mut self, separator: &str, source: &str, header: &str, detail: &str) {
        if !self.body.is_empty() {
            self.body.push_str(separator);
        }
        self.body.push_str(header);
        self.items.push((source.to_string(), self.body.len()));
        self.body.push_str(detail);
    }
}

pub struct ContextAssembler {
    similarity: Arc<dyn SimilarityBackend>,
    graph: Arc<dyn GraphBackend>,
    retrieval: RetrievalConfig,
    cache: RwLock<HashMap<CacheKey, ContextResult>>,
}

impl ContextAssembler {
    pub fn new(
        similarity: Arc<dyn SimilarityBackend>,
        graph: Arc<dyn GraphBackend>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            similarity,
            graph,
            retrieval,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Assembled context text for `query`; empty when nothing was found.
    pub async fn get_enhanced_context(&self, query: &str, options: &ContextOptions) -> String {
        self.assemble(query, options).await.text
    }

    pub async fn assemble(&self, query: &str, options: &ContextOptions) -> ContextResult {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return ContextResult::empty();
        }

        let entities: Vec<Entity> = extract_entities(query).into_iter().collect();
        let key = CacheKey {
            query: normalized,
            entities,
            max_length: options
                .max_length
                .unwrap_or(self.retrieval.max_context_length),
            max_results: options.max_results.unwrap_or(self.retrieval.max_results),
            include_graph: options.include_graph,
            include_similarity: options.include_similarity,
        };

        let cached = self.cache.read().ok().and_then(|c| c.get(&key).cloned());
        if let Some(hit) = cached {
            debug!(query = %key.query, "context cache hit");
            return hit;
        }

        let mut degraded = false;
        let mut sections = Vec::new();

        if key.include_graph && !key.entities.is_empty() {
            match self.expand_graph(&key.entities).await {
                Ok(nodes) if !nodes.is_empty() => {
                    sections.push(render_nodes(self.graph.name(), &nodes));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "graph expansion failed, continuing without it");
                    degraded = true;
                }
            }
        }

        if key.include_similarity {
            match self.search(query, key.max_results).await {
                Ok(hits) if !hits.is_empty() => sections.push(render_hits(&hits)),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "similarity search failed, continuing without it");
                    degraded = true;
                }
            }
        }

        let result = self.finish(&sections, key.max_length);

        if !degraded {
            if let Ok(mut cache) = self.cache.write() {
                cache.insert(key, result.clone());
            }
        }
        result
    }

    async fn expand_graph(&self, entities: &[Entity]) -> Result<Vec<GraphNode>> {
        call_backend(
            self.graph.name(),
            self.retrieval.backend_timeout(),
            self.graph.expand(
                entities,
                self.retrieval.max_context_depth,
                self.retrieval.max_context_nodes,
            ),
        )
        .await
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ScoredDocument>> {
        call_backend(
            self.similarity.name(),
            self.retrieval.backend_timeout(),
            self.similarity
                .search(query, max_results, self.retrieval.similarity_threshold),
        )
        .await
    }

    fn finish(&self, sections: &[Section], max_length: usize) -> ContextResult {
        if sections.is_empty() {
            return ContextResult::empty();
        }

        let merged = sections
            .iter()
            .map(|s| format!("{}\n{}", s.provenance.label(), s.body))
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);

        let marker = self.retrieval.truncation_marker.as_str();
        let bounded = truncate_with_fallback_marker(&merged, max_length, marker);
        if !bounded.truncated {
            return ContextResult {
                attributions: attributions(sections, bounded.text.len()),
                text: bounded.text,
                truncated: false,
            };
        }

        let body = bounded.text.strip_suffix(marker).unwrap_or(&bounded.text);
        let body = drop_dangling_lines(body);
        let text = if body.is_empty() {
            String::new()
        } else {
            format!("{}{}", body, marker)
        };
        ContextResult {
            text,
            truncated: true,
            attributions: attributions(sections, body.len()),
        }
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

fn render_nodes(graph: &str, nodes: &[GraphNode]) -> Section {
    let mut section = Section::new(Provenance::Graph);
    for node in nodes {
        section.push_item("\n", graph, &format!("- {}", node.render()), "");
    }
    section
}

fn render_hits(hits: &[ScoredDocument]) -> Section {
    let mut section = Section::new(Provenance::Similarity);
    for hit in hits {
        let doc = &hit.document;
        let source = doc.source().unwrap_or("unknown");
        let header = format!(
            "[{} | {} | score {:.2}]",
            doc.title().unwrap_or(&doc.id),
            source,
            hit.score
        );
        section.push_item(
            SECTION_SEPARATOR,
            source,
            &header,
            &format!("\n{}", doc.content.trim_end()),
        );
    }
    section
}

/// One attribution per (provenance, source), in first-item order, counting
/// only items whose first line lies within the first `visible` bytes of the
/// merged sections.
fn attributions(sections: &[Section], visible: usize) -> Vec<Attribution> {
    let mut out: Vec<Attribution> = Vec::new();
    let mut offset = 0;
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            offset += SECTION_SEPARATOR.len();
        }
        let body_start = offset + section.provenance.label().len() + 1;
        for (source, header_end) in &section.items {
            if body_start + header_end > visible {
                break;
            }
            let existing = out
                .iter_mut()
                .find(|a| a.provenance == section.provenance && a.source == *source);
            match existing {
                Some(a) => a.items += 1,
                None => out.push(Attribution {
                    provenance: section.provenance,
                    source: source.clone(),
                    items: 1,
                }),
            }
        }
        offset = body_start + section.body.len();
    }
    out
}

/// Strip trailing lines left without content by a cut: a provenance label
/// (or a cut-off prefix of one) and an empty list marker.
fn drop_dangling_lines(body: &str) -> &str {
    let labels = [Provenance::Graph.label(), Provenance::Similarity.label()];
    let mut body = body.trim_end();
    loop {
        let start = body.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let last = &body[start..];
        let dangling_label = last.starts_with('#') && labels.iter().any(|l| l.starts_with(last));
        let bare_marker = matches!(last.trim(), "-" | "*");
        if !dangling_label && !bare_marker {
            return body;
        }
        body = body[..start].trim_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_harness_core::backend::memory::{InMemoryGraph, InMemorySimilarityStore};
    use knowledge_harness_core::models::{RelationTriplet, RetrievalDocument};

    async fn backends() -> (Arc<InMemorySimilarityStore>, Arc<InMemoryGraph>) {
        let sim = Arc::new(InMemorySimilarityStore::new());
        sim.upsert(
            "guides",
            &[RetrievalDocument::new("markdown:scan.md", "Scan 10.0.0.5 with nmap for open ports.")
                .with("title", "Scanning")
                .with("source", "markdown:docs")],
        )
        .await
        .unwrap();

        let graph = Arc::new(InMemoryGraph::new());
        graph
            .create_from_triplets(&[
                RelationTriplet::new("10.0.0.5", "is_a", "host", 1.0, "t"),
                RelationTriplet::new("10.0.0.5", "runs", "ssh", 1.0, "t"),
            ])
            .await
            .unwrap();
        (sim, graph)
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            similarity_threshold: 0.3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_graph_section_precedes_documents() {
        let (sim, graph) = backends().await;
        let asm = ContextAssembler::new(sim, graph, config());

        let result = asm
            .assemble("scan 10.0.0.5 with nmap", &ContextOptions::default())
            .await;
        let g = result.text.find("### Knowledge Graph Findings").unwrap();
        let d = result.text.find("### Retrieved Documents").unwrap();
        assert!(g < d);
        assert!(result.text.contains("- host: 10.0.0.5"));
        assert!(result.text.contains("[Scanning | markdown:docs | score "));
        assert!(!result.truncated);
        assert_eq!(result.attributions.len(), 2);
        assert_eq!(result.attributions[0].provenance, Provenance::Graph);
    }

    #[tokio::test]
    async fn test_results_cached_until_cleared() {
        let (sim, graph) = backends().await;
        let asm = ContextAssembler::new(sim.clone(), graph, config());
        let opts = ContextOptions::default();

        let first = asm.get_enhanced_context("Scan  10.0.0.5", &opts).await;
        assert_eq!(asm.cache_len(), 1);

        // New content is invisible until the cache is cleared.
        sim.upsert(
            "guides",
            &[RetrievalDocument::new("markdown:extra.md", "scan everything")],
        )
        .await
        .unwrap();
        let second = asm.get_enhanced_context("scan 10.0.0.5", &opts).await;
        assert_eq!(first, second);

        asm.clear_cache();
        assert_eq!(asm.cache_len(), 0);
        let third = asm.get_enhanced_context("scan 10.0.0.5", &opts).await;
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_options_disable_sections() {
        let (sim, graph) = backends().await;
        let asm = ContextAssembler::new(sim, graph, config());
        let opts = ContextOptions {
            include_graph: false,
            ..Default::default()
        };
        let text = asm.get_enhanced_context("scan 10.0.0.5", &opts).await;
        assert!(!text.contains("### Knowledge Graph Findings"));
        assert!(text.starts_with("### Retrieved Documents"));
    }

    #[tokio::test]
    async fn test_nothing_found_is_empty() {
        let (sim, graph) = backends().await;
        let asm = ContextAssembler::new(sim, graph, config());
        assert_eq!(
            asm.get_enhanced_context("zzz qqq", &ContextOptions::default()).await,
            ""
        );
        assert_eq!(asm.get_enhanced_context("   ", &ContextOptions::default()).await, "");
    }

    #[tokio::test]
    async fn test_truncated_context_respects_budget() {
        let (sim, graph) = backends().await;
        let asm = ContextAssembler::new(sim, graph, config());
        let opts = ContextOptions {
            max_length: Some(60),
            ..Default::default()
        };
        let result = asm.assemble("scan 10.0.0.5 with nmap", &opts).await;
        let marker = &config().truncation_marker;
        assert!(result.truncated);
        assert!(result.text.ends_with(marker.as_str()));
        assert!(result.text.chars().count() <= 60 + marker.chars().count());
        assert!(!result
            .text
            .trim_end_matches(marker.as_str())
            .trim_end()
            .ends_with("### Retrieved Documents"));
    }

    #[test]
    fn test_drop_dangling_lines() {
        assert_eq!(
            drop_dangling_lines("### Knowledge Graph Findings\n- a\n\n### Retrieved Documents"),
            "### Knowledge Graph Findings\n- a"
        );
        assert_eq!(
            drop_dangling_lines("### Knowledge Graph Findings\n- a\n\n### Retr"),
            "### Knowledge Graph Findings\n- a"
        );
        assert_eq!(drop_dangling_lines("### Knowledge Gr"), "");
        assert_eq!(drop_dangling_lines("- a\n- b"), "- a\n- b");
        assert_eq!(
            drop_dangling_lines("### Knowledge Graph Findings\n- host: 10.0.0.5\n- Entity: apache\n-"),
            "### Knowledge Graph Findings\n- host: 10.0.0.5\n- Entity: apache"
        );
        assert_eq!(drop_dangling_lines("### Knowledge Graph Findings\n- "), "");
    }

    #[tokio::test]
    async fn test_attributions_follow_truncation() {
        let (sim, graph) = backends().await;
        let asm = ContextAssembler::new(sim, graph, config());
        let query = "scan 10.0.0.5 with nmap";

        let full = asm.assemble(query, &ContextOptions::default()).await;
        let nodes = full.attributions[0].items;
        assert!(nodes >= 2);
        let docs_at = full.text.find("\n\n### Retrieved Documents").unwrap();

        // Budget ends inside the documents label: only the graph survives.
        let opts = ContextOptions {
            max_length: Some(docs_at + 6),
            ..Default::default()
        };
        let cut = asm.assemble(query, &opts).await;
        assert!(cut.truncated);
        assert!(!cut.text.contains("### Retr"));
        assert_eq!(cut.attributions.len(), 1);
        assert_eq!(cut.attributions[0].provenance, Provenance::Graph);
        assert_eq!(cut.attributions[0].items, nodes);

        // Budget ends two chars into the last bullet: that node is dropped.
        let last_bullet = full.text[..docs_at].rfind("\n- ").unwrap();
        let opts = ContextOptions {
            max_length: Some(last_bullet + 4),
            ..Default::default()
        };
        let cut = asm.assemble(query, &opts).await;
        assert!(cut.truncated);
        let body = cut.text.trim_end_matches(config().truncation_marker.as_str());
        assert!(!body.ends_with('-'), "got: {:?}", cut.text);
        assert_eq!(cut.attributions.len(), 1);
        assert_eq!(cut.attributions[0].items, nodes - 1);
        assert_eq!(body.lines().filter(|l| l.starts_with("- ")).count(), nodes - 1);
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Scan\tTHE   host "), "scan the host");
    }
}
