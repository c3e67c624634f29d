//! Retrieval backend abstraction.
//!
//! The context assembler consumes two collaborators through narrow
//! contracts: a [`SimilarityBackend`] for ranked document retrieval and a
//! [`GraphBackend`] for structured expansion around query entities.
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! [`memory`] module provides reference implementations used by the CLI
//! and by tests.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Entity, GraphNode, RelationTriplet, RetrievalDocument, ScoredDocument};

/// Similarity search over [`RetrievalDocument`]s.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](SimilarityBackend::upsert) | Insert or replace documents in a collection |
/// | [`search`](SimilarityBackend::search) | Ranked search across all collections |
#[async_trait]
pub trait SimilarityBackend: Send + Sync {
    /// Backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Insert or replace documents (by id) in `collection`.
    async fn upsert(&self, collection: &str, documents: &[RetrievalDocument]) -> Result<()>;

    /// Return at most `max_results` documents scoring `>= min_score`,
    /// highest score first.
    async fn search(
        &self,
        query_text: &str,
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<ScoredDocument>>;
}

/// Graph storage over [`RelationTriplet`]s.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Batch-load triplets. Returns `true` if the graph changed.
    async fn create_from_triplets(&self, triplets: &[RelationTriplet]) -> Result<bool>;

    /// Nodes reachable from the entities within `max_depth` hops, capped at
    /// `max_nodes`.
    async fn expand(
        &self,
        entities: &[Entity],
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Vec<GraphNode>>;
}
