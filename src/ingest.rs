//! Ingestion: registry → chunking → similarity and graph backends.
//!
//! Aggregates every ready source, splits documents into overlapping chunks,
//! upserts the chunks per collection into the similarity backend, and loads
//! all triplets into the graph backend. Backend failures (including
//! timeouts) are logged and recorded in the [`IngestReport`]; they never
//! abort the run.

use knowledge_harness_core::backend::{GraphBackend, SimilarityBackend};
use knowledge_harness_core::chunk::chunk_document;
use knowledge_harness_core::models::RetrievalDocument;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::assembler::call_backend;
use crate::config::RetrievalConfig;
use crate::registry::SourceRegistry;

const DEFAULT_COLLECTION: &str = "default";

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub collections: usize,
    pub triplets: usize,
    pub graph_changed: bool,
    pub errors: Vec<String>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Push the registry's current content into the backends. With `dry_run`
/// the counts are computed but nothing is written.
pub async fn sync_backends(
    registry: &SourceRegistry,
    similarity: &dyn SimilarityBackend,
    graph: &dyn GraphBackend,
    retrieval: &RetrievalConfig,
    dry_run: bool,
) -> IngestReport {
    let mut report = IngestReport::default();
    let timeout = retrieval.backend_timeout();

    let documents = registry.aggregate_documents(None).await;
    report.documents = documents.len();

    let mut by_collection: BTreeMap<String, Vec<RetrievalDocument>> = BTreeMap::new();
    for doc in &documents {
        let collection = doc.collection().unwrap_or(DEFAULT_COLLECTION).to_string();
        let chunks = chunk_document(doc, retrieval.chunk_size, retrieval.chunk_overlap);
        report.chunks += chunks.len();
        by_collection.entry(collection).or_default().extend(chunks);
    }
    report.collections = by_collection.len();

    let triplets = registry.aggregate_triplets(None).await;
    report.triplets = triplets.len();

    if dry_run {
        return report;
    }

    for (collection, chunks) in &by_collection {
        let result = call_backend(
            similarity.name(),
            timeout,
            similarity.upsert(collection, chunks),
        )
        .await;
        if let Err(e) = result {
            warn!(collection = %collection, error = %e, "similarity upsert failed");
            report.errors.push(format!("upsert {}: {}", collection, e));
        }
    }

    match call_backend(graph.name(), timeout, graph.create_from_triplets(&triplets)).await {
        Ok(changed) => report.graph_changed = changed,
        Err(e) => {
            warn!(error = %e, "graph load failed");
            report.errors.push(format!("graph: {}", e));
        }
    }

    info!(
        documents = report.documents,
        chunks = report.chunks,
        triplets = report.triplets,
        "ingest finished"
    );
    report
}

pub fn print_report(report: &IngestReport, dry_run: bool) {
    if dry_run {
        println!("ingest (dry-run)");
    } else {
        println!("ingest");
    }
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  collections: {}", report.collections);
    println!("  triplets: {}", report.triplets);
    if !dry_run {
        println!("  graph changed: {}", report.graph_changed);
    }
    for err in &report.errors {
        println!("  error: {}", err);
    }
    if report.is_clean() {
        println!("ok");
    }
}
