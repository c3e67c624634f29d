//! Markdown document adapter.
//!
//! Walks the configured paths, parses each matching file once through the
//! [`ContentCache`], and turns it into one [`RetrievalDocument`] plus a set
//! of relation triplets.
//!
//! # Parsing
//!
//! - A leading `---` YAML block supplies `title`, `author`, `date` and
//!   `tags` (list or comma-separated string). A block that fails to parse is
//!   ignored.
//! - Missing fields fall back to body heuristics: `Author:` or `By <Name>`
//!   lines, the first `YYYY-MM-DD` date, `Tags:` / `Keywords:` lines.
//! - Title is the first `# ` heading, then the front-matter title, then the
//!   file name.
//! - Reading time is `ceil(words / 200)` minutes.
//!
//! Documents are identified as `markdown:<path relative to the root>` and
//! grouped into collections by their parent directory (`"root"` at the
//! top level).

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use knowledge_harness_core::models::{content_hash, RelationTriplet, RetrievalDocument};
use knowledge_harness_core::{KnowledgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cache::{ContentCache, Loaded};
use crate::config::{MarkdownSourceConfig, SourceSettings};
use crate::relations::{RegexRelationExtractor, RelationExtractor};
use crate::traits::SourceAdapter;

const WORDS_PER_MINUTE: usize = 200;
const ROOT_COLLECTION: &str = "root";

/// Parsed form of one markdown file, as stored in the content cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMarkdown {
    pub title: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub tags: Vec<String>,
    pub word_count: usize,
    pub reading_time_minutes: usize,
    /// Cleaned body text, markup removed.
    pub body: String,
    /// Markdown source after the front-matter block.
    pub markdown: String,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    author: Option<String>,
    date: Option<serde_yaml::Value>,
    tags: Option<TagsField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsField {
    List(Vec<String>),
    Text(String),
}

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#\s+(.+?)\s*#*\s*$").expect("valid regex"));
static AUTHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*(?:\*\*)?author(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.+?)\s*$").expect("valid regex")
});
static BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[Bb]y\s+([A-Z][A-Za-z.\-']*(?:\s+[A-Z][A-Za-z.\-']*){0,3})\s*$")
        .expect("valid regex")
});
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid regex"));
static TAGS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*(?:\*\*)?(?:tags|keywords)(?:\*\*)?\s*:\s*(.+?)\s*$").expect("valid regex")
});

static HEADING_MARK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+").expect("valid regex"));
static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)[-*+]\s+").expect("valid regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static BOLD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\*\*|__)([^*_\n]+?)(\*\*|__)").expect("valid regex"));
static STAR_EM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\n]+)\*").expect("valid regex"));
static UNDERSCORE_EM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\w])_([^_\n]+)_([^\w]|$)").expect("valid regex"));
static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));

/// Parse a markdown file's text. `file_name` is the title of last resort.
pub fn parse_markdown(file_name: &str, raw: &str) -> ParsedMarkdown {
    let (front, markdown) = split_front_matter(raw);
    let front = front.map(parse_front_matter).unwrap_or_default();

    let title = HEADING_RE
        .captures(markdown)
        .map(|c| c[1].to_string())
        .or_else(|| front.title.clone().filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| file_name.to_string());

    let author = front
        .author
        .clone()
        .filter(|a| !a.trim().is_empty())
        .or_else(|| AUTHOR_RE.captures(markdown).map(|c| c[1].to_string()))
        .or_else(|| BY_RE.captures(markdown).map(|c| c[1].to_string()));

    let date = front
        .date
        .as_ref()
        .and_then(yaml_scalar)
        .or_else(|| DATE_RE.captures(markdown).map(|c| c[1].to_string()));

    let tags = match front.tags {
        Some(TagsField::List(list)) => normalize_tags(list.iter().map(String::as_str)),
        Some(TagsField::Text(text)) => normalize_tags(text.split(',')),
        None => TAGS_RE
            .captures(markdown)
            .map(|c| normalize_tags(c[1].split(',')))
            .unwrap_or_default(),
    };

    let body = clean_body(markdown);
    let word_count = body.split_whitespace().count();

    ParsedMarkdown {
        title,
        author,
        date,
        tags,
        word_count,
        reading_time_minutes: word_count.div_ceil(WORDS_PER_MINUTE),
        body,
        markdown: markdown.to_string(),
    }
}

/// Split a leading `---` block from the rest of the text.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    else {
        return (None, raw);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, raw)
}

fn parse_front_matter(yaml: &str) -> FrontMatter {
    match serde_yaml::from_str::<FrontMatter>(yaml) {
        Ok(fm) => fm,
        Err(e) => {
            debug!(error = %e, "ignoring malformed front matter");
            FrontMatter::default()
        }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_tags<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut tags = Vec::new();
    for tag in raw {
        let tag = tag
            .trim()
            .trim_matches(|c: char| c == '[' || c == ']' || c == '"' || c == '\'')
            .trim_start_matches('#')
            .trim();
        if !tag.is_empty() && !tags.iter().any(|t: &String| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Strip markup and collapse blank-line runs.
fn clean_body(markdown: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            continue;
        }
        if trimmed.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
            continue;
        }
        previous_blank = false;

        let line = HEADING_MARK_RE.replace(line, "");
        let line = BULLET_RE.replace(&line, "${1}- ");
        let line = LINK_RE.replace_all(&line, "${1}");
        let line = BOLD_RE.replace_all(&line, "${2}");
        let line = STAR_EM_RE.replace_all(&line, "${1}");
        let line = UNDERSCORE_EM_RE.replace_all(&line, "${1}${2}${3}");
        let line = INLINE_CODE_RE.replace_all(&line, "${1}");
        lines.push(line.trim_end().to_string());
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// One discovered file, before parsing.
struct MarkdownFile {
    path: PathBuf,
    relative: String,
    file_name: String,
    collection: String,
}

pub struct MarkdownAdapter {
    config: MarkdownSourceConfig,
    cache: Arc<ContentCache>,
    extractor: Box<dyn RelationExtractor>,
}

impl MarkdownAdapter {
    pub fn new(config: MarkdownSourceConfig, cache: Arc<ContentCache>) -> Self {
        Self {
            config,
            cache,
            extractor: Box::new(RegexRelationExtractor::new()),
        }
    }

    /// Replace the content-derived relation extractor.
    pub fn with_extractor(mut self, extractor: Box<dyn RelationExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Run file-system work on a blocking thread, bounded by the source
    /// timeout. The task keeps running after a timeout but its result is
    /// dropped.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MarkdownSourceConfig, &ContentCache) -> Result<T> + Send + 'static,
    {
        let config = self.config.clone();
        let cache = Arc::clone(&self.cache);
        let timeout = self.config.settings.timeout();
        let task = tokio::task::spawn_blocking(move || work(&config, cache.as_ref()));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(KnowledgeError::unavailable(
                self.name(),
                format!("scan task failed: {}", e),
            )),
            Err(_) => Err(KnowledgeError::unavailable(
                self.name(),
                format!("scan timed out after {:?}", timeout),
            )),
        }
    }

    async fn parsed(&self, collection: Option<&str>) -> Result<Vec<(MarkdownFile, ParsedMarkdown)>> {
        let collection = collection.map(str::to_string);
        self.blocking(move |config, cache| parse_files(config, cache, collection.as_deref()))
            .await
    }

    fn to_document(&self, file: &MarkdownFile, parsed: &ParsedMarkdown) -> RetrievalDocument {
        let content = render_content(parsed);
        let hash = content_hash(&content);

        let mut doc = RetrievalDocument::new(format!("markdown:{}", file.relative), content)
            .with("title", parsed.title.as_str())
            .with("tags", parsed.tags.clone())
            .with("word_count", parsed.word_count)
            .with("reading_time_minutes", parsed.reading_time_minutes)
            .with("file_name", file.file_name.as_str())
            .with("path", file.path.display().to_string())
            .with("collection", file.collection.as_str())
            .with("source", self.source_label())
            .with("source_type", self.source_type())
            .with("content_hash", hash);
        if let Some(author) = &parsed.author {
            doc = doc.with("author", author.as_str());
        }
        if let Some(date) = &parsed.date {
            doc = doc.with("date", date.as_str());
        }
        doc
    }

    fn to_triplets(&self, file: &MarkdownFile, parsed: &ParsedMarkdown) -> Vec<RelationTriplet> {
        let source = self.source_label();
        let subject = file.file_name.as_str();

        let mut triplets = vec![
            RelationTriplet::new(subject, "is_a", "markdown_document", 1.0, &source),
            RelationTriplet::new(subject, "has_title", parsed.title.as_str(), 1.0, &source),
        ];
        if let Some(author) = &parsed.author {
            triplets.push(RelationTriplet::new(subject, "authored_by", author.as_str(), 0.9, &source));
        }
        for tag in &parsed.tags {
            triplets.push(RelationTriplet::new(subject, "has_tag", tag.as_str(), 0.8, &source));
        }
        triplets.extend(self.extractor.extract(subject, &parsed.markdown, &source));
        triplets
    }
}

fn globsets(config: &MarkdownSourceConfig) -> Result<(GlobSet, GlobSet)> {
    let name = config.settings.name.as_str();
    let include =
        build_globset(&config.include_globs).map_err(|e| KnowledgeError::invalid(name, e.to_string()))?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes).map_err(|e| KnowledgeError::invalid(name, e.to_string()))?;
    Ok((include, exclude))
}

fn discover(config: &MarkdownSourceConfig) -> Result<Vec<MarkdownFile>> {
    let (include, exclude) = globsets(config)?;
    let mut files = Vec::new();

    for root in &config.paths {
        if root.is_file() {
            let file_name = file_name_of(root);
            files.push(MarkdownFile {
                path: root.clone(),
                relative: file_name.clone(),
                file_name,
                collection: ROOT_COLLECTION.to_string(),
            });
            continue;
        }

        let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
                continue;
            }

            let collection = relative
                .parent()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| ROOT_COLLECTION.to_string());

            files.push(MarkdownFile {
                path: path.to_path_buf(),
                file_name: file_name_of(path),
                relative: rel_str,
                collection,
            });
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Discover and parse, skipping files that cannot be read.
fn parse_files(
    config: &MarkdownSourceConfig,
    cache: &ContentCache,
    collection: Option<&str>,
) -> Result<Vec<(MarkdownFile, ParsedMarkdown)>> {
    let mut out = Vec::new();
    for file in discover(config)? {
        if collection.is_some_and(|c| c != file.collection) {
            continue;
        }
        let identity = format!("markdown:{}", file.path.display());
        let result = cache.get(&identity, &file.path, || {
            let raw = std::fs::read_to_string(&file.path)?;
            Ok(Loaded {
                parsed: parse_markdown(&file.file_name, &raw),
                raw_content: raw,
            })
        });
        match result {
            Ok(parsed) => out.push((file, parsed)),
            Err(e) => warn!(
                source = %config.settings.name,
                path = %file.path.display(),
                error = %e,
                "skipping unreadable markdown file"
            ),
        }
    }
    Ok(out)
}

fn render_content(parsed: &ParsedMarkdown) -> String {
    let mut preamble = format!("Title: {}\n", parsed.title);
    if let Some(author) = &parsed.author {
        preamble.push_str(&format!("Author: {}\n", author));
    }
    if let Some(date) = &parsed.date {
        preamble.push_str(&format!("Date: {}\n", date));
    }
    if !parsed.tags.is_empty() {
        preamble.push_str(&format!("Tags: {}\n", parsed.tags.join(", ")));
    }
    preamble.push_str(&format!("Word count: {}\n", parsed.word_count));

    if parsed.body.is_empty() {
        preamble
    } else {
        format!("{}\n{}", preamble, parsed.body)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> std::result::Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

#[async_trait]
impl SourceAdapter for MarkdownAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.config.settings
    }

    fn source_type(&self) -> &str {
        "markdown"
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.paths.is_empty() {
            return Err(KnowledgeError::invalid(self.name(), "no paths configured"));
        }
        if self.config.include_globs.is_empty() {
            return Err(KnowledgeError::invalid(self.name(), "include_globs is empty"));
        }
        globsets(&self.config).map(|_| ())
    }

    async fn load(&self) -> Result<()> {
        let missing: Vec<String> = self
            .config
            .paths
            .iter()
            .filter(|p| !p.exists())
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(KnowledgeError::unavailable(
                self.name(),
                format!("path does not exist: {}", missing.join(", ")),
            ));
        }
        Ok(())
    }

    async fn get_documents(&self, collection: Option<&str>) -> Result<Vec<RetrievalDocument>> {
        Ok(self
            .parsed(collection)
            .await?
            .iter()
            .map(|(file, parsed)| self.to_document(file, parsed))
            .collect())
    }

    async fn get_triplets(&self, collection: Option<&str>) -> Result<Vec<RelationTriplet>> {
        Ok(self
            .parsed(collection)
            .await?
            .iter()
            .flat_map(|(file, parsed)| self.to_triplets(file, parsed))
            .collect())
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let files = self.blocking(|config, _| discover(config)).await?;
        Ok(files.into_iter().map(|f| f.collection).collect())
    }
}
