//! Source registry: owns the configured adapters and aggregates their output.
//!
//! Adapters are kept ordered by descending priority, ties broken by
//! registration order. Each carries a [`SourceStatus`] decided when it is
//! registered:
//!
//! | Status | Cause |
//! |--------|-------|
//! | `Ready` | validated and loaded |
//! | `Disabled` | `enabled = false` in config |
//! | `Invalid` | `validate_config` failed |
//! | `Unavailable` | `load` failed |
//!
//! Only ready sources are read. Errors from a ready source during
//! aggregation are logged and that source contributes nothing; the other
//! sources are unaffected.

use knowledge_harness_core::models::{RelationTriplet, RetrievalDocument};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapter_manpage::ManpageAdapter;
use crate::adapter_markdown::MarkdownAdapter;
use crate::adapter_taxonomy::TaxonomyAdapter;
use crate::cache::ContentCache;
use crate::config::{Config, SourceConfig};
use crate::traits::SourceAdapter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SourceStatus {
    Ready,
    Disabled,
    Invalid(String),
    Unavailable(String),
}

impl SourceStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SourceStatus::Ready)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceStatus::Ready => "ready",
            SourceStatus::Disabled => "disabled",
            SourceStatus::Invalid(_) => "invalid",
            SourceStatus::Unavailable(_) => "unavailable",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SourceStatus::Invalid(r) | SourceStatus::Unavailable(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({})", self.label(), reason),
            None => f.write_str(self.label()),
        }
    }
}

/// Static description of a registered source, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub source_type: String,
    pub description: String,
    pub priority: i32,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatistics {
    pub name: String,
    pub source_type: String,
    pub enabled: bool,
    pub priority: i32,
    pub status: SourceStatus,
    pub document_count: usize,
    pub triplet_count: usize,
    /// Set when counting failed; counts are then zero.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStatistics {
    pub total_sources: usize,
    pub total_documents: usize,
    pub total_triplets: usize,
    pub sources: Vec<SourceStatistics>,
}

struct Entry {
    adapter: Box<dyn SourceAdapter>,
    status: SourceStatus,
    seq: usize,
}

pub struct SourceRegistry {
    entries: Vec<Entry>,
    next_seq: usize,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Build the adapter for one `[[sources]]` entry.
    pub fn adapter_for(source: &SourceConfig, cache: Arc<ContentCache>) -> Box<dyn SourceAdapter> {
        match source {
            SourceConfig::Markdown(c) => Box::new(MarkdownAdapter::new(c.clone(), cache)),
            SourceConfig::Manpage(c) => Box::new(ManpageAdapter::new(c.clone(), cache)),
            SourceConfig::Taxonomy(c) => Box::new(TaxonomyAdapter::new(c.clone())),
        }
    }

    /// Register every configured source. Never fails: broken sources are
    /// kept with a non-ready status.
    pub async fn from_config(config: &Config, cache: Arc<ContentCache>) -> Self {
        let mut registry = Self::new();
        for source in &config.sources {
            registry
                .register(Self::adapter_for(source, Arc::clone(&cache)))
                .await;
        }
        registry
    }

    /// Validate and load `adapter`, then add it. An adapter with the same
    /// name is replaced in place; no other source is touched.
    pub async fn register(&mut self, adapter: Box<dyn SourceAdapter>) -> SourceStatus {
        let status = Self::prepare(adapter.as_ref()).await;
        let name = adapter.name().to_string();

        if let Some(idx) = self.entries.iter().position(|e| e.adapter.name() == name) {
            debug!(source = %name, "replacing registered source");
            let existing = &mut self.entries[idx];
            existing.adapter = adapter;
            existing.status = status.clone();
        } else {
            self.entries.push(Entry {
                adapter,
                status: status.clone(),
                seq: self.next_seq,
            });
            self.next_seq += 1;
        }

        self.entries.sort_by(|a, b| {
            b.adapter
                .settings()
                .priority
                .cmp(&a.adapter.settings().priority)
                .then(a.seq.cmp(&b.seq))
        });
        status
    }

    async fn prepare(adapter: &dyn SourceAdapter) -> SourceStatus {
        if !adapter.settings().enabled {
            debug!(source = %adapter.name(), "source disabled");
            return SourceStatus::Disabled;
        }
        if let Err(e) = adapter.validate_config() {
            warn!(source = %adapter.name(), error = %e, "disabling source with invalid config");
            return SourceStatus::Invalid(e.to_string());
        }
        if let Err(e) = adapter.load().await {
            warn!(source = %adapter.name(), error = %e, "source unavailable");
            return SourceStatus::Unavailable(e.to_string());
        }
        debug!(source = %adapter.name(), source_type = %adapter.source_type(), "source ready");
        SourceStatus::Ready
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self, name: &str) -> Option<&SourceStatus> {
        self.entries
            .iter()
            .find(|e| e.adapter.name() == name)
            .map(|e| &e.status)
    }

    /// All sources in aggregation order.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.entries
            .iter()
            .map(|e| SourceInfo {
                name: e.adapter.name().to_string(),
                source_type: e.adapter.source_type().to_string(),
                description: e.adapter.settings().description.clone(),
                priority: e.adapter.settings().priority,
                status: e.status.clone(),
            })
            .collect()
    }

    fn ready(&self) -> impl Iterator<Item = &dyn SourceAdapter> {
        self.entries
            .iter()
            .filter(|e| e.status.is_ready())
            .map(|e| e.adapter.as_ref())
    }

    /// Documents from every ready source, in priority order. Not
    /// deduplicated across sources.
    pub async fn aggregate_documents(&self, collection: Option<&str>) -> Vec<RetrievalDocument> {
        let mut out = Vec::new();
        for adapter in self.ready() {
            match adapter.get_documents(collection).await {
                Ok(docs) => out.extend(docs),
                Err(e) => warn!(source = %adapter.name(), error = %e, "failed to read documents"),
            }
        }
        out
    }

    pub async fn aggregate_triplets(&self, collection: Option<&str>) -> Vec<RelationTriplet> {
        let mut out = Vec::new();
        for adapter in self.ready() {
            match adapter.get_triplets(collection).await {
                Ok(triplets) => out.extend(triplets),
                Err(e) => warn!(source = %adapter.name(), error = %e, "failed to read triplets"),
            }
        }
        out
    }

    /// Collections of each ready source, in priority order.
    pub async fn collections_by_source(&self) -> Vec<(String, BTreeSet<String>)> {
        let mut out = Vec::new();
        for adapter in self.ready() {
            match adapter.list_collections().await {
                Ok(c) => out.push((adapter.name().to_string(), c)),
                Err(e) => warn!(source = %adapter.name(), error = %e, "failed to list collections"),
            }
        }
        out
    }

    pub async fn list_collections(&self) -> BTreeSet<String> {
        self.collections_by_source()
            .await
            .into_iter()
            .flat_map(|(_, c)| c)
            .collect()
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            total_sources: self.entries.len(),
            ..Default::default()
        };

        for entry in &self.entries {
            let adapter = entry.adapter.as_ref();
            let mut s = SourceStatistics {
                name: adapter.name().to_string(),
                source_type: adapter.source_type().to_string(),
                enabled: adapter.settings().enabled,
                priority: adapter.settings().priority,
                status: entry.status.clone(),
                document_count: 0,
                triplet_count: 0,
                error: None,
            };
            if entry.status.is_ready() {
                match adapter.statistics().await {
                    Ok(a) => {
                        s.document_count = a.document_count;
                        s.triplet_count = a.triplet_count;
                    }
                    Err(e) => {
                        warn!(source = %adapter.name(), error = %e, "failed to count source");
                        s.error = Some(e.to_string());
                    }
                }
            }
            stats.total_documents += s.document_count;
            stats.total_triplets += s.triplet_count;
            stats.sources.push(s);
        }
        stats
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSettings;
    use async_trait::async_trait;
    use knowledge_harness_core::{KnowledgeError, Result};

    struct Stub {
        settings: SourceSettings,
        docs: usize,
        invalid: bool,
    }

    fn stub(name: &str, priority: i32, docs: usize) -> Box<Stub> {
        let mut settings = SourceSettings::new(name);
        settings.priority = priority;
        Box::new(Stub {
            settings,
            docs,
            invalid: false,
        })
    }

    #[async_trait]
    impl SourceAdapter for Stub {
        fn settings(&self) -> &SourceSettings {
            &self.settings
        }
        fn source_type(&self) -> &str {
            "stub"
        }
        fn validate_config(&self) -> Result<()> {
            if self.invalid {
                return Err(KnowledgeError::invalid(self.name(), "bad"));
            }
            Ok(())
        }
        async fn load(&self) -> Result<()> {
            Ok(())
        }
        async fn get_documents(&self, _c: Option<&str>) -> Result<Vec<RetrievalDocument>> {
            Ok((0..self.docs)
                .map(|i| RetrievalDocument::new(format!("{}:{}", self.name(), i), "x"))
                .collect())
        }
        async fn get_triplets(&self, _c: Option<&str>) -> Result<Vec<RelationTriplet>> {
            Ok(vec![RelationTriplet::new(self.name(), "is_a", "stub", 1.0, "s")])
        }
        async fn list_collections(&self) -> Result<BTreeSet<String>> {
            Ok(BTreeSet::from([self.name().to_string()]))
        }
    }

    #[tokio::test]
    async fn test_priority_then_registration_order() {
        let mut reg = SourceRegistry::new();
        reg.register(stub("low", 1, 1)).await;
        reg.register(stub("first_high", 5, 1)).await;
        reg.register(stub("second_high", 5, 1)).await;

        let names: Vec<String> = reg.sources().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["first_high", "second_high", "low"]);

        let docs = reg.aggregate_documents(None).await;
        assert_eq!(docs[0].id, "first_high:0");
        assert_eq!(docs[2].id, "low:0");
    }

    #[tokio::test]
    async fn test_disabled_and_invalid_skipped() {
        let mut reg = SourceRegistry::new();
        let mut off = stub("off", 0, 3);
        off.settings.enabled = false;
        let mut bad = stub("bad", 0, 3);
        bad.invalid = true;

        assert_eq!(reg.register(off).await, SourceStatus::Disabled);
        assert!(matches!(reg.register(bad).await, SourceStatus::Invalid(_)));
        assert_eq!(reg.register(stub("ok", 0, 2)).await, SourceStatus::Ready);

        assert_eq!(reg.aggregate_documents(None).await.len(), 2);
        assert_eq!(reg.list_collections().await, BTreeSet::from(["ok".to_string()]));

        let stats = reg.statistics().await;
        assert_eq!(stats.total_sources, 3);
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_triplets, 1);
        let off_stats = stats.sources.iter().find(|s| s.name == "off").unwrap();
        assert_eq!(off_stats.document_count, 0);
        assert_eq!(off_stats.status, SourceStatus::Disabled);
    }

    #[tokio::test]
    async fn test_reregister_replaces() {
        let mut reg = SourceRegistry::new();
        reg.register(stub("a", 0, 1)).await;
        reg.register(stub("b", 0, 1)).await;
        reg.register(stub("a", 0, 4)).await;

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.aggregate_documents(None).await.len(), 5);
        assert_eq!(reg.sources()[0].name, "a");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SourceStatus::Ready.to_string(), "ready");
        assert_eq!(
            SourceStatus::Unavailable("man not found".into()).to_string(),
            "unavailable (man not found)"
        );
    }
}
