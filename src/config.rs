//! TOML configuration parsing and validation.
//!
//! Knowledge Harness is configured via a TOML file (default:
//! `config/kh.toml`) with three parts: the content cache, global retrieval
//! tunables, and an ordered list of `[[sources]]`.
//!
//! Global tunables are validated by [`load_config`] and abort startup when
//! wrong. Per-source parameters are validated later by each adapter's
//! `validate_config`, which disables only that source.

use anyhow::{bail, Context, Result};
use knowledge_harness_core::truncate::DEFAULT_MARKER;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            freshness_hours: default_freshness_hours(),
        }
    }
}

impl CacheConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_hours * 3600)
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}
fn default_freshness_hours() -> u64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_context_depth")]
    pub max_context_depth: usize,
    #[serde(default = "default_max_context_nodes")]
    pub max_context_nodes: usize,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_context_depth: default_max_context_depth(),
            max_context_nodes: default_max_context_nodes(),
            max_context_length: default_max_context_length(),
            backend_timeout_secs: default_backend_timeout_secs(),
            truncation_marker: default_truncation_marker(),
        }
    }
}

impl RetrievalConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn default_max_results() -> usize {
    7
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_max_context_depth() -> usize {
    3
}
fn default_max_context_nodes() -> usize {
    50
}
fn default_max_context_length() -> usize {
    8000
}
fn default_backend_timeout_secs() -> u64 {
    10
}
fn default_truncation_marker() -> String {
    DEFAULT_MARKER.to_string()
}

/// Settings shared by every source type.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceSettings {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
    /// Upper bound on one file scan or external command, in seconds.
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

impl SourceSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority: 0,
            description: String::new(),
            timeout_secs: default_source_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_source_timeout_secs() -> u64 {
    30
}

/// One `[[sources]]` entry, discriminated by `type`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Markdown(MarkdownSourceConfig),
    Manpage(ManpageSourceConfig),
    Taxonomy(TaxonomySourceConfig),
}

impl SourceConfig {
    pub fn settings(&self) -> &SourceSettings {
        match self {
            SourceConfig::Markdown(c) => &c.settings,
            SourceConfig::Manpage(c) => &c.settings,
            SourceConfig::Taxonomy(c) => &c.settings,
        }
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            SourceConfig::Markdown(_) => "markdown",
            SourceConfig::Manpage(_) => "manpage",
            SourceConfig::Taxonomy(_) => "taxonomy",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarkdownSourceConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,
    /// Files or directories to read.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_markdown_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_markdown_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.markdown".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManpageSourceConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,
    /// Commands whose manual pages are ingested.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Command → category. Unlisted commands fall into `"general"`.
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    /// Maximum characters of rendered page kept per command.
    #[serde(default = "default_man_max_chars")]
    pub max_chars: usize,
}

fn default_man_max_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomySourceConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,
    #[serde(default = "default_enabled")]
    pub include_mitigations: bool,
    /// Restrict to these tactics; empty means all.
    #[serde(default)]
    pub tactics: Vec<String>,
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Validate global tunables and source naming.
pub fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;

    if !(0.0..=1.0).contains(&r.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if r.max_results < 1 {
        bail!("retrieval.max_results must be >= 1");
    }
    if r.max_context_length == 0 {
        bail!("retrieval.max_context_length must be > 0");
    }
    if r.chunk_size == 0 {
        bail!("retrieval.chunk_size must be > 0");
    }
    if r.chunk_overlap >= r.chunk_size {
        bail!("retrieval.chunk_overlap must be < retrieval.chunk_size");
    }
    if r.max_context_depth < 1 {
        bail!("retrieval.max_context_depth must be >= 1");
    }
    if r.max_context_nodes < 1 {
        bail!("retrieval.max_context_nodes must be >= 1");
    }

    let mut seen = HashSet::new();
    for source in &config.sources {
        let name = source.settings().name.trim();
        if name.is_empty() {
            bail!("every [[sources]] entry needs a non-empty name");
        }
        if !seen.insert(name.to_string()) {
            bail!("duplicate source name: '{}'", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[cache]
dir = "/tmp/kh-cache"

[retrieval]
max_results = 5
max_context_length = 4000

[[sources]]
type = "markdown"
name = "lab_docs"
priority = 10
description = "Lab write-ups"
paths = ["/srv/docs"]

[[sources]]
type = "manpage"
name = "manuals"
enabled = false
commands = ["nmap", "nc"]
[sources.categories]
nmap = "network_scanning"

[[sources]]
type = "taxonomy"
name = "attack"
"#;

    #[test]
    fn test_parse_sample() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.cache.freshness_hours, 24);
        assert_eq!(cfg.retrieval.max_results, 5);
        assert_eq!(cfg.retrieval.similarity_threshold, 0.7);
        assert_eq!(cfg.sources.len(), 3);

        match &cfg.sources[0] {
            SourceConfig::Markdown(m) => {
                assert_eq!(m.settings.name, "lab_docs");
                assert_eq!(m.settings.priority, 10);
                assert!(m.settings.enabled);
                assert_eq!(m.include_globs, default_markdown_globs());
            }
            other => panic!("expected markdown, got {:?}", other),
        }
        match &cfg.sources[1] {
            SourceConfig::Manpage(m) => {
                assert!(!m.settings.enabled);
                assert_eq!(m.categories["nmap"], "network_scanning");
                assert_eq!(m.max_chars, 6000);
            }
            other => panic!("expected manpage, got {:?}", other),
        }
        assert_eq!(cfg.sources[2].source_type(), "taxonomy");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.retrieval.max_context_depth, 3);
        assert_eq!(cfg.retrieval.max_context_nodes, 50);
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let cfg: Config = toml::from_str("[retrieval]\nsimilarity_threshold = 1.5\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_overlap_not_below_chunk_size() {
        let cfg: Config =
            toml::from_str("[retrieval]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let cfg: Config = toml::from_str(
            "[[sources]]\ntype = \"taxonomy\"\nname = \"a\"\n\n[[sources]]\ntype = \"taxonomy\"\nname = \"a\"\n",
        )
        .unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let res: std::result::Result<Config, _> =
            toml::from_str("[[sources]]\ntype = \"xml\"\nname = \"a\"\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg: Config = toml::from_str(include_str!("../config/kh.example.toml")).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sources.len(), 3);
        match &cfg.sources[1] {
            SourceConfig::Manpage(m) => {
                assert_eq!(m.categories.get("nmap").map(String::as_str), Some("network_scanning"));
            }
            other => panic!("expected manpage, got {}", other.source_type()),
        }
    }
}
