//! Core data models used throughout Knowledge Harness.
//!
//! These types represent the documents, relation triplets, query entities,
//! graph nodes, and assembled context that flow through the aggregation
//! and retrieval pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A single metadata value attached to a [`RetrievalDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            MetadataValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Integer(n)
    }
}

impl From<usize> for MetadataValue {
    fn from(n: usize) -> Self {
        MetadataValue::Integer(n as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Float(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(v: Vec<String>) -> Self {
        MetadataValue::List(v)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(n) => write!(f, "{}", n),
            MetadataValue::Float(n) => write!(f, "{}", n),
            MetadataValue::Text(s) => write!(f, "{}", s),
            MetadataValue::List(v) => write!(f, "{}", v.join(", ")),
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A unit of text handed to the similarity backend.
///
/// `id` is derived from the source type and the source-local identity, so
/// re-ingesting an unchanged source yields the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDocument {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl RetrievalDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insertion.
    pub fn with(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.meta_str("title")
    }

    /// Source label, `"<type>:<name>"`.
    pub fn source(&self) -> Option<&str> {
        self.meta_str("source")
    }

    pub fn collection(&self) -> Option<&str> {
        self.meta_str("collection")
    }
}

/// SHA-256 hex digest of a document body, stored as `content_hash`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One directed, labeled edge: `subject --predicate--> object`.
///
/// Duplicates are allowed at this layer; deduplication is the graph
/// backend's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationTriplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub source: String,
}

impl RelationTriplet {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }
}

/// Kinds of structured entities recognized in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    IpAddress,
    Url,
    Hash,
    Filename,
    Port,
    Email,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::IpAddress => "ip_address",
            EntityKind::Url => "url",
            EntityKind::Hash => "hash",
            EntityKind::Filename => "filename",
            EntityKind::Port => "port",
            EntityKind::Email => "email",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed value extracted from query text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// A node returned by graph expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

impl GraphNode {
    pub fn name(&self) -> &str {
        self.properties
            .get("name")
            .map(String::as_str)
            .unwrap_or(&self.id)
    }

    /// `"<labels joined by comma>: <name>"`.
    pub fn render(&self) -> String {
        format!("{}: {}", self.labels.join(", "), self.name())
    }
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub document: RetrievalDocument,
    /// Similarity in `[0.0, 1.0]`.
    pub score: f64,
}

/// Which retrieval path produced a context section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Graph,
    Similarity,
}

impl Provenance {
    /// Section label written into the assembled context.
    pub fn label(&self) -> &'static str {
        match self {
            Provenance::Graph => "### Knowledge Graph Findings",
            Provenance::Similarity => "### Retrieved Documents",
        }
    }
}

/// How many items one source contributed through one retrieval path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    pub provenance: Provenance,
    pub source: String,
    pub items: usize,
}

/// Assembled, bounded context for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextResult {
    pub text: String,
    pub truncated: bool,
    pub attributions: Vec<Attribution>,
}

impl ContextResult {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            truncated: false,
            attributions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triplet_confidence_clamped() {
        let t = RelationTriplet::new("a", "p", "b", 1.7, "s");
        assert_eq!(t.confidence, 1.0);
        let t = RelationTriplet::new("a", "p", "b", -0.2, "s");
        assert_eq!(t.confidence, 0.0);
    }

    #[test]
    fn test_graph_node_render() {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), "nmap".to_string());
        let node = GraphNode {
            id: "n1".to_string(),
            labels: vec!["command".to_string(), "tool".to_string()],
            properties,
        };
        assert_eq!(node.render(), "command, tool: nmap");
    }

    #[test]
    fn test_metadata_untagged_roundtrip_keeps_lists() {
        let doc = RetrievalDocument::new("markdown:a.md", "body")
            .with("title", "A")
            .with("tags", vec!["sql".to_string(), "injection".to_string()])
            .with("word_count", 12usize);
        let json = serde_json::to_string(&doc).unwrap();
        let back: RetrievalDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.title(), Some("A"));
        assert_eq!(
            back.metadata["tags"].as_list().unwrap(),
            &["sql".to_string(), "injection".to_string()]
        );
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
