//! Integration tests for the extension seams.
//!
//! These tests prove that custom source adapters (implemented via the
//! `SourceAdapter` trait) and custom retrieval backends (via
//! `SimilarityBackend` and `GraphBackend`) work end-to-end through the
//! registry, the ingest step, and the context assembler.

use async_trait::async_trait;
use knowledge_harness::assembler::{ContextAssembler, ContextOptions};
use knowledge_harness::cache::ContentCache;
use knowledge_harness::config::{MarkdownSourceConfig, RetrievalConfig, SourceSettings};
use knowledge_harness::adapter_markdown::MarkdownAdapter;
use knowledge_harness::ingest::sync_backends;
use knowledge_harness::registry::{SourceRegistry, SourceStatus};
use knowledge_harness::traits::SourceAdapter;
use knowledge_harness_core::backend::memory::{InMemoryGraph, InMemorySimilarityStore};
use knowledge_harness_core::backend::{GraphBackend, SimilarityBackend};
use knowledge_harness_core::models::{
    Entity, EntityKind, GraphNode, RelationTriplet, RetrievalDocument, ScoredDocument,
};
use knowledge_harness_core::{KnowledgeError, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Test Adapter ───────────────────────────────────────────────────

/// An in-memory adapter returning hardcoded playbook entries.
struct PlaybookAdapter {
    settings: SourceSettings,
    fail_load: bool,
}

impl PlaybookAdapter {
    fn new(name: &str, priority: i32) -> Self {
        let mut settings = SourceSettings::new(name);
        settings.priority = priority;
        Self {
            settings,
            fail_load: false,
        }
    }

    fn failing(name: &str) -> Self {
        Self {
            fail_load: true,
            ..Self::new(name, 0)
        }
    }
}

#[async_trait]
impl SourceAdapter for PlaybookAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn source_type(&self) -> &str {
        "playbook"
    }

    async fn load(&self) -> Result<()> {
        if self.fail_load {
            return Err(KnowledgeError::unavailable(self.name(), "playbook server offline"));
        }
        Ok(())
    }

    async fn get_documents(&self, _collection: Option<&str>) -> Result<Vec<RetrievalDocument>> {
        Ok(vec![RetrievalDocument::new(
            format!("{}:pivot", self.name()),
            "Pivoting through a jump host with ssh port forwarding.",
        )
        .with("title", "Pivoting Playbook")
        .with("source", self.name())
        .with("collection", "playbooks")])
    }

    async fn get_triplets(&self, _collection: Option<&str>) -> Result<Vec<RelationTriplet>> {
        Ok(vec![
            RelationTriplet::new("jump-host", "is_a", "pivot_point", 1.0, self.name()),
            RelationTriplet::new("jump-host", "has_address", "192.168.1.100", 1.0, self.name()),
        ])
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::from(["playbooks".to_string()]))
    }
}

// ─── Test Backends ──────────────────────────────────────────────────

/// Graph backend that records the entities it is asked to expand.
#[derive(Default)]
struct RecordingGraph {
    seen: Mutex<Vec<Entity>>,
}

#[async_trait]
impl GraphBackend for RecordingGraph {
    fn name(&self) -> &str {
        "recording-graph"
    }

    async fn create_from_triplets(&self, _triplets: &[RelationTriplet]) -> Result<bool> {
        Ok(false)
    }

    async fn expand(
        &self,
        entities: &[Entity],
        _max_depth: usize,
        _max_nodes: usize,
    ) -> Result<Vec<GraphNode>> {
        self.seen.lock().unwrap().extend_from_slice(entities);
        Ok(Vec::new())
    }
}

struct FailingGraph;

#[async_trait]
impl GraphBackend for FailingGraph {
    fn name(&self) -> &str {
        "failing-graph"
    }

    async fn create_from_triplets(&self, _triplets: &[RelationTriplet]) -> Result<bool> {
        Err(KnowledgeError::unreachable(self.name(), "connection refused"))
    }

    async fn expand(
        &self,
        _entities: &[Entity],
        _max_depth: usize,
        _max_nodes: usize,
    ) -> Result<Vec<GraphNode>> {
        Err(KnowledgeError::unreachable(self.name(), "connection refused"))
    }
}

/// Similarity backend that never answers in time.
struct SlowSimilarity;

#[async_trait]
impl SimilarityBackend for SlowSimilarity {
    fn name(&self) -> &str {
        "slow-similarity"
    }

    async fn upsert(&self, _collection: &str, _documents: &[RetrievalDocument]) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn search(
        &self,
        _query_text: &str,
        _max_results: usize,
        _min_score: f64,
    ) -> Result<Vec<ScoredDocument>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

fn fast_retrieval() -> RetrievalConfig {
    RetrievalConfig {
        backend_timeout_secs: 1,
        similarity_threshold: 0.3,
        ..RetrievalConfig::default()
    }
}

// ─── Registry ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_failing_adapter_is_isolated() {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(PlaybookAdapter::new("playbooks", 0))).await;
    let status = registry.register(Box::new(PlaybookAdapter::failing("offline"))).await;

    assert!(matches!(status, SourceStatus::Unavailable(ref r) if r.contains("offline")));
    assert_eq!(registry.len(), 2);

    let docs = registry.aggregate_documents(None).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].source(), Some("playbooks"));

    let stats = registry.statistics().await;
    assert_eq!(stats.total_sources, 2);
    assert_eq!(stats.total_documents, 1);
    let offline = stats.sources.iter().find(|s| s.name == "offline").unwrap();
    assert_eq!(offline.document_count, 0);
    assert_eq!(offline.triplet_count, 0);
    assert!(!offline.status.is_ready());
}

#[tokio::test]
async fn test_custom_adapter_end_to_end() {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(PlaybookAdapter::new("playbooks", 5))).await;

    let similarity = Arc::new(InMemorySimilarityStore::new());
    let graph = Arc::new(InMemoryGraph::new());
    let retrieval = fast_retrieval();
    let report = sync_backends(
        &registry,
        similarity.as_ref(),
        graph.as_ref(),
        &retrieval,
        false,
    )
    .await;
    assert!(report.is_clean());
    assert_eq!(report.triplets, 2);

    let assembler = ContextAssembler::new(similarity, graph, retrieval);
    let result = assembler
        .assemble(
            "how do I pivot via 192.168.1.100 with ssh port forwarding",
            &ContextOptions::default(),
        )
        .await;

    let graph_at = result.text.find("### Knowledge Graph Findings").unwrap();
    let docs_at = result.text.find("### Retrieved Documents").unwrap();
    assert!(graph_at < docs_at);
    assert!(result.text.contains("pivot_point: jump-host"));
    assert!(result.text.contains("Pivoting Playbook"));
    assert!(!result.truncated);
}

// ─── Backend failures ───────────────────────────────────────────────

#[tokio::test]
async fn test_entities_reach_graph_backend() {
    let graph = Arc::new(RecordingGraph::default());
    let assembler = ContextAssembler::new(
        Arc::new(InMemorySimilarityStore::new()),
        graph.clone(),
        fast_retrieval(),
    );

    let text = assembler
        .get_enhanced_context(
            "host 192.168.1.100 downloaded http://malicious.com/malware.exe",
            &ContextOptions::default(),
        )
        .await;
    assert!(text.is_empty());

    let seen = graph.seen.lock().unwrap().clone();
    assert!(seen.contains(&Entity::new(EntityKind::IpAddress, "192.168.1.100")));
    assert!(seen.contains(&Entity::new(EntityKind::Url, "http://malicious.com/malware.exe")));
}

#[tokio::test]
async fn test_unreachable_backends_yield_empty_context() {
    let assembler = ContextAssembler::new(
        Arc::new(SlowSimilarity),
        Arc::new(FailingGraph),
        fast_retrieval(),
    );

    let text = assembler
        .get_enhanced_context("scan 10.0.0.5 for open ports", &ContextOptions::default())
        .await;
    assert_eq!(text, "");
    assert_eq!(assembler.cache_len(), 0);
}

#[tokio::test]
async fn test_ingest_survives_backend_failures() {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(PlaybookAdapter::new("playbooks", 0))).await;

    let report = sync_backends(
        &registry,
        &SlowSimilarity,
        &FailingGraph,
        &fast_retrieval(),
        false,
    )
    .await;
    assert_eq!(report.documents, 1);
    assert_eq!(report.errors.len(), 2);
    assert!(!report.graph_changed);
}

// ─── Markdown scenario ──────────────────────────────────────────────

const SQLI_GUIDE: &str = "# Blind SQL Injection\n\n\
Author: Lab Staff\n\n\
When the login form does not echo errors, use time-based payloads.\n\n\
Use the Blind Extraction technique when responses are slow.\n\n\
```sql\nSELECT IF(1=1, SLEEP(5), 0);\n```\n";

#[tokio::test]
async fn test_sql_injection_question_gets_guide() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("blind-sqli.md"), SQLI_GUIDE).unwrap();

    let cache = Arc::new(
        ContentCache::new(tmp.path().join("cache"), Duration::from_secs(3600)).unwrap(),
    );
    let config = MarkdownSourceConfig {
        settings: SourceSettings::new("lab_docs"),
        paths: vec![docs],
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: Vec::new(),
        follow_symlinks: false,
    };

    let mut registry = SourceRegistry::new();
    let status = registry
        .register(Box::new(MarkdownAdapter::new(config, cache)))
        .await;
    assert_eq!(status, SourceStatus::Ready);

    let triplets = registry.aggregate_triplets(None).await;
    assert!(triplets.iter().any(|t| t.predicate == "contains_code_in_language" && t.object == "sql"));
    assert!(triplets.iter().any(|t| t.predicate == "discusses_concept" && t.object == "Blind Extraction"));

    let similarity = Arc::new(InMemorySimilarityStore::new());
    let graph = Arc::new(InMemoryGraph::new());
    let retrieval = fast_retrieval();
    sync_backends(&registry, similarity.as_ref(), graph.as_ref(), &retrieval, false).await;

    let assembler = ContextAssembler::new(similarity, graph, retrieval);
    let result = assembler
        .assemble("blind sql injection login form", &ContextOptions::default())
        .await;
    assert!(result.text.starts_with("### Retrieved Documents"));
    assert!(result.text.contains("Blind SQL Injection"));
    assert!(result.text.contains("Blind Extraction"));
    assert_eq!(result.attributions.len(), 1);
    assert_eq!(result.attributions[0].source, "markdown:lab_docs");
}
