//! The source adapter contract.
//!
//! Every knowledge source (markdown notes, manual pages, the compiled-in
//! technique taxonomy, or a custom Rust type) implements [`SourceAdapter`]
//! and is held by the [`SourceRegistry`](crate::registry::SourceRegistry) as
//! a trait object.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              SourceRegistry               │
//! │  ┌──────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │ Markdown │ │ Manpage │ │  Taxonomy  │  │
//! │  │  (+cache)│ │ (+cache)│ │  / custom  │  │
//! │  └──────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬────────────────────────────┘
//!                ▼
//!   aggregate_documents() / aggregate_triplets()
//!                ▼
//!   ingest::sync_backends() → similarity + graph backends
//! ```
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use knowledge_harness::config::SourceSettings;
//! use knowledge_harness::traits::SourceAdapter;
//! use knowledge_harness_core::models::{RelationTriplet, RetrievalDocument};
//! use knowledge_harness_core::Result;
//! use std::collections::BTreeSet;
//!
//! pub struct Notes {
//!     settings: SourceSettings,
//! }
//!
//! #[async_trait]
//! impl SourceAdapter for Notes {
//!     fn settings(&self) -> &SourceSettings { &self.settings }
//!     fn source_type(&self) -> &str { "notes" }
//!
//!     async fn load(&self) -> Result<()> { Ok(()) }
//!
//!     async fn get_documents(&self, _collection: Option<&str>) -> Result<Vec<RetrievalDocument>> {
//!         Ok(vec![RetrievalDocument::new("notes:1", "Remember to rotate the keys.")])
//!     }
//!
//!     async fn get_triplets(&self, _collection: Option<&str>) -> Result<Vec<RelationTriplet>> {
//!         Ok(vec![])
//!     }
//!
//!     async fn list_collections(&self) -> Result<BTreeSet<String>> {
//!         Ok(BTreeSet::from(["root".to_string()]))
//!     }
//! }
//! ```

use async_trait::async_trait;
use knowledge_harness_core::models::{RelationTriplet, RetrievalDocument};
use knowledge_harness_core::Result;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::SourceSettings;

/// Per-source counts reported by [`SourceAdapter::statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterStatistics {
    pub document_count: usize,
    pub triplet_count: usize,
    pub enabled: bool,
    pub priority: i32,
}

/// A knowledge source producing retrieval documents and relation triplets.
///
/// # Lifecycle
///
/// 1. [`validate_config`](SourceAdapter::validate_config) runs when the
///    adapter is registered; an error disables the source.
/// 2. [`load`](SourceAdapter::load) checks that the source is reachable; an
///    error marks it unavailable.
/// 3. The read operations are then called any number of times. They must be
///    deterministic for an unchanged source and return an empty sequence,
///    not an error, for an unknown collection.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Name, enabled flag, priority and description from configuration.
    fn settings(&self) -> &SourceSettings;

    /// Adapter type identifier (e.g. `"markdown"`, `"manpage"`).
    fn source_type(&self) -> &str;

    fn name(&self) -> &str {
        &self.settings().name
    }

    /// Label stamped on documents and triplets: `"{type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.source_type(), self.name())
    }

    /// Check source-specific parameters. Defaults to accepting anything.
    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Prepare the source. Fails with `SourceUnavailable` when it cannot be
    /// read at all.
    async fn load(&self) -> Result<()>;

    async fn get_documents(&self, collection: Option<&str>) -> Result<Vec<RetrievalDocument>>;

    async fn get_triplets(&self, collection: Option<&str>) -> Result<Vec<RelationTriplet>>;

    async fn list_collections(&self) -> Result<BTreeSet<String>>;

    async fn statistics(&self) -> Result<AdapterStatistics> {
        let documents = self.get_documents(None).await?;
        let triplets = self.get_triplets(None).await?;
        Ok(AdapterStatistics {
            document_count: documents.len(),
            triplet_count: triplets.len(),
            enabled: self.settings().enabled,
            priority: self.settings().priority,
        })
    }
}
