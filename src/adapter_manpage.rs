//! Manual-page adapter.
//!
//! Converts the host's manual pages for a configured list of commands into
//! one document per command plus triplets describing its purpose, category
//! and options. Requires a `man` executable; [`load`](SourceAdapter::load)
//! fails with `SourceUnavailable` when it is missing.
//!
//! For each command the adapter runs `man -w <cmd>` to locate the page file
//! (a command without a page is skipped with a warning), then
//! `man -P cat <cmd>` to render it. Rendered pages are parsed once and kept
//! in the [`ContentCache`] under `man:<cmd>`, keyed to the page file's
//! modification time.
//!
//! Every `man` invocation runs as a child process bounded by the source's
//! `timeout_secs`; on timeout the child is killed and the command skipped.

use async_trait::async_trait;
use knowledge_harness_core::models::{content_hash, RelationTriplet, RetrievalDocument};
use knowledge_harness_core::truncate::truncate_with_fallback;
use knowledge_harness_core::{KnowledgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::cache::{ContentCache, Loaded, Lookup};
use crate::config::{ManpageSourceConfig, SourceSettings};
use crate::traits::SourceAdapter;

const DEFAULT_CATEGORY: &str = "general";
const MAX_OPTION_TRIPLETS: usize = 20;
const MAN_WIDTH: &str = "100";

/// One command-line option from the OPTIONS section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManOption {
    pub flag: String,
    pub description: String,
}

/// Parsed form of one rendered manual page, as stored in the content cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedManpage {
    pub command: String,
    pub section: Option<String>,
    pub purpose: String,
    pub synopsis: String,
    pub description: String,
    pub options: Vec<ManOption>,
}

static SECTION_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z ]*[A-Z]$").expect("valid regex"));
static TITLE_SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+\((\d\w*)\)").expect("valid regex"));
static PATH_SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(\d\w*?)(?:\.(?:gz|bz2|xz|lzma|Z))?$").expect("valid regex"));
static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid regex"));
static COMMAND_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._+\-]*$").expect("valid regex"));

/// Remove `x\bx` (bold) and `_\bx` (underline) overstrike sequences.
pub fn strip_overstrike(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\u{8}' {
            out.pop();
        } else {
            out.push(c);
        }
    }
    ANSI_RE.replace_all(&out, "").into_owned()
}

/// Split a rendered page into `HEADER -> body lines`.
fn split_sections(rendered: &str) -> BTreeMap<String, Vec<String>> {
    let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in rendered.lines() {
        let starts_indented = line.starts_with(char::is_whitespace);
        if !starts_indented && SECTION_HEADER_RE.is_match(line.trim_end()) {
            let name = line.trim_end().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let Some(name) = &current {
            sections.entry(name.clone()).or_default().push(line.to_string());
        }
    }
    sections
}

/// Dedent and collapse blank-line runs.
fn section_text(lines: &[String]) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() && out.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        out.push(trimmed);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn parse_options(lines: &[String]) -> Vec<ManOption> {
    let base_indent = lines
        .iter()
        .filter(|l| l.trim_start().starts_with('-'))
        .map(|l| indent_of(l))
        .min();
    let Some(base_indent) = base_indent else {
        return Vec::new();
    };

    let mut options = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if indent_of(line) != base_indent || !trimmed.starts_with('-') {
            continue;
        }

        let flag_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let flag = trimmed[..flag_end].trim_end_matches(',').to_string();
        let rest = &trimmed[flag_end..];

        // Two or more spaces after the flag separate it from an inline
        // description; a single space introduces an argument name.
        let inline = if rest.starts_with("  ") || rest.starts_with('\t') {
            rest.trim()
        } else {
            ""
        };
        let description = if inline.is_empty() {
            lines[i + 1..]
                .iter()
                .find(|l| !l.trim().is_empty())
                .filter(|l| indent_of(l) > base_indent)
                .map(|l| l.trim().to_string())
                .unwrap_or_default()
        } else {
            inline.to_string()
        };

        options.push(ManOption { flag, description });
    }
    options
}

/// Parse a rendered (overstrike-free) page.
pub fn parse_manpage(command: &str, rendered: &str, page_path: Option<&Path>) -> ParsedManpage {
    let sections = split_sections(rendered);
    let text_of = |name: &str| sections.get(name).map(|l| section_text(l)).unwrap_or_default();

    let name_text = text_of("NAME").replace('\n', " ");
    let purpose = ["\\-", " - ", " — ", " – "]
        .iter()
        .find_map(|sep| name_text.split_once(sep).map(|(_, p)| p.trim().to_string()))
        .unwrap_or_else(|| name_text.trim().to_string());

    let options = sections
        .get("OPTIONS")
        .or_else(|| sections.get("DESCRIPTION"))
        .map(|l| parse_options(l))
        .unwrap_or_default();

    let section = page_path
        .and_then(|p| p.file_name())
        .and_then(|n| PATH_SECTION_RE.captures(&n.to_string_lossy()).map(|c| c[1].to_string()))
        .or_else(|| {
            rendered
                .lines()
                .find(|l| !l.trim().is_empty())
                .and_then(|l| TITLE_SECTION_RE.captures(l.trim()).map(|c| c[1].to_string()))
        });

    ParsedManpage {
        command: command.to_string(),
        section,
        purpose,
        synopsis: text_of("SYNOPSIS"),
        description: text_of("DESCRIPTION"),
        options,
    }
}

pub struct ManpageAdapter {
    config: ManpageSourceConfig,
    cache: Arc<ContentCache>,
    man_program: PathBuf,
}

impl ManpageAdapter {
    pub fn new(config: ManpageSourceConfig, cache: Arc<ContentCache>) -> Self {
        Self {
            config,
            cache,
            man_program: PathBuf::from("man"),
        }
    }

    /// Use a different `man` executable.
    pub fn with_man_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.man_program = program.into();
        self
    }

    fn category_of(&self, command: &str) -> &str {
        self.config
            .categories
            .get(command)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Run `man` with `args`, killed once the source timeout elapses.
    async fn run_man(&self, args: &[&str]) -> Result<Output> {
        let timeout = self.config.settings.timeout();
        let mut cmd = Command::new(&self.man_program);
        cmd.args(args)
            .env("MANWIDTH", MAN_WIDTH)
            .env("GROFF_NO_SGR", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(KnowledgeError::unavailable(
                self.name(),
                format!("cannot run '{}': {}", self.man_program.display(), e),
            )),
            Err(_) => Err(KnowledgeError::unavailable(
                self.name(),
                format!("man {} timed out after {:?}", args.join(" "), timeout),
            )),
        }
    }

    /// Page file for `command`, `None` when it has no manual page.
    async fn locate(&self, command: &str) -> Result<Option<PathBuf>> {
        let output = self.run_man(&["-w", command]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(PathBuf::from))
    }

    async fn render(&self, command: &str) -> Result<String> {
        let output = self.run_man(&["-P", "cat", command]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KnowledgeError::unavailable(
                self.name(),
                format!("man {} failed: {}", command, stderr.trim()),
            ));
        }
        let rendered = strip_overstrike(&String::from_utf8_lossy(&output.stdout));
        if rendered.trim().is_empty() {
            return Err(KnowledgeError::unavailable(
                self.name(),
                format!("man {} produced no output", command),
            ));
        }
        Ok(rendered)
    }

    async fn page(&self, command: &str, page_path: &Path) -> Result<ParsedManpage> {
        let identity = format!("man:{}", command);
        match self.cache.lookup(&identity, page_path)? {
            Lookup::Hit(page) => Ok(page),
            Lookup::Miss { live_mtime } => {
                let rendered = self.render(command).await?;
                let loaded = Loaded {
                    parsed: parse_manpage(command, &rendered, Some(page_path)),
                    raw_content: rendered,
                };
                Ok(self.cache.store(&identity, page_path, live_mtime, loaded))
            }
        }
    }

    /// Parsed pages for the commands in `collection` (or all of them).
    async fn pages(&self, collection: Option<&str>) -> Vec<ParsedManpage> {
        let mut pages = Vec::new();
        for command in &self.config.commands {
            if collection.is_some_and(|c| c != self.category_of(command)) {
                continue;
            }
            let page_path = match self.locate(command).await {
                Ok(Some(path)) => path,
                Ok(None) => {
                    warn!(source = %self.name(), command = %command, "no manual page found, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(source = %self.name(), command = %command, error = %e, "skipping manual page");
                    continue;
                }
            };
            match self.page(command, &page_path).await {
                Ok(page) => pages.push(page),
                Err(e) => warn!(source = %self.name(), command = %command, error = %e, "skipping manual page"),
            }
        }
        pages
    }

    fn to_document(&self, page: &ParsedManpage) -> RetrievalDocument {
        let category = self.category_of(&page.command);

        let mut content = format!("Command: {}\n", page.command);
        if let Some(section) = &page.section {
            content.push_str(&format!("Section: {}\n", section));
        }
        content.push_str(&format!("Category: {}\n", category));
        if !page.purpose.is_empty() {
            content.push_str(&format!("Purpose: {}\n", page.purpose));
        }
        for (header, body) in [("SYNOPSIS", &page.synopsis), ("DESCRIPTION", &page.description)] {
            if !body.is_empty() {
                content.push_str(&format!("\n{}\n{}\n", header, body));
            }
        }
        if !page.options.is_empty() {
            content.push_str("\nOPTIONS\n");
            for opt in page.options.iter().take(MAX_OPTION_TRIPLETS) {
                content.push_str(&format!("{}: {}\n", opt.flag, opt.description));
            }
        }

        let bounded = truncate_with_fallback(&content, self.config.max_chars);
        let hash = content_hash(&bounded.text);

        let mut doc = RetrievalDocument::new(format!("manpage:{}", page.command), bounded.text)
            .with("title", page.command.as_str())
            .with("command", page.command.as_str())
            .with("purpose", page.purpose.as_str())
            .with("category", category)
            .with("option_count", page.options.len())
            .with("truncated", bounded.truncated)
            .with("collection", category)
            .with("source", self.source_label())
            .with("source_type", self.source_type())
            .with("content_hash", hash);
        if let Some(section) = &page.section {
            doc = doc.with("section", section.as_str());
        }
        doc
    }

    fn to_triplets(&self, page: &ParsedManpage) -> Vec<RelationTriplet> {
        let source = self.source_label();
        let cmd = page.command.as_str();

        let mut triplets = vec![RelationTriplet::new(cmd, "is_a", "command", 1.0, &source)];
        if !page.purpose.is_empty() {
            triplets.push(RelationTriplet::new(cmd, "has_purpose", page.purpose.as_str(), 0.9, &source));
        }
        triplets.push(RelationTriplet::new(
            cmd,
            "belongs_to_category",
            self.category_of(cmd),
            0.9,
            &source,
        ));
        for opt in page.options.iter().take(MAX_OPTION_TRIPLETS) {
            triplets.push(RelationTriplet::new(cmd, "has_option", opt.flag.as_str(), 0.7, &source));
        }
        if let Some(section) = &page.section {
            triplets.push(RelationTriplet::new(
                cmd,
                "documented_in",
                format!("man_section_{}", section),
                1.0,
                &source,
            ));
        }
        triplets
    }
}

#[async_trait]
impl SourceAdapter for ManpageAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.config.settings
    }

    fn source_type(&self) -> &str {
        "manpage"
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.commands.is_empty() {
            return Err(KnowledgeError::invalid(self.name(), "no commands configured"));
        }
        if self.config.max_chars == 0 {
            return Err(KnowledgeError::invalid(self.name(), "max_chars must be > 0"));
        }
        if let Some(bad) = self
            .config
            .commands
            .iter()
            .find(|c| !COMMAND_NAME_RE.is_match(c))
        {
            return Err(KnowledgeError::invalid(
                self.name(),
                format!("invalid command name: '{}'", bad),
            ));
        }
        for command in self.config.categories.keys() {
            if !self.config.commands.contains(command) {
                debug!(source = %self.name(), command = %command, "category for unlisted command");
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.run_man(&["--version"]).await.map(|_| ())
    }

    async fn get_documents(&self, collection: Option<&str>) -> Result<Vec<RetrievalDocument>> {
        Ok(self
            .pages(collection)
            .await
            .iter()
            .map(|p| self.to_document(p))
            .collect())
    }

    async fn get_triplets(&self, collection: Option<&str>) -> Result<Vec<RelationTriplet>> {
        Ok(self
            .pages(collection)
            .await
            .iter()
            .flat_map(|p| self.to_triplets(p))
            .collect())
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .config
            .commands
            .iter()
            .map(|c| self.category_of(c).to_string())
            .collect())
    }
}
