//! Content-derived relation extraction.
//!
//! Adapters emit their structural triplets (`is_a`, `has_title`, ...)
//! themselves and hand the body text to a [`RelationExtractor`] for
//! everything inferred from prose. The default [`RegexRelationExtractor`]
//! is best-effort pattern matching; swapping it out does not touch the
//! document path.

use knowledge_harness_core::models::RelationTriplet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub trait RelationExtractor: Send + Sync {
    fn extract(&self, subject: &str, text: &str, source: &str) -> Vec<RelationTriplet>;
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^```([A-Za-z0-9_+\-]+)[^\n]*$").expect("valid regex"));
static FENCED_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^```.*?^```").expect("valid regex"));
static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));
static CONCEPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((?:[A-Z][A-Za-z0-9\-]*\s+){1,4})(?:concept|technique|methodology)\b")
        .expect("valid regex")
});
static ABS_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s(`])(/(?:[A-Za-z0-9._\-]+/)*[A-Za-z0-9._\-]+)").expect("valid regex")
});
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").expect("valid regex"));

/// Regex-driven extractor for markdown-ish text.
///
/// | Predicate | Pattern | Confidence |
/// |-----------|---------|------------|
/// | `references_command` | inline code span | 0.7 |
/// | `discusses_concept` | capitalized words + concept/technique/methodology | 0.6 |
/// | `references_file` | absolute path | 0.8 |
/// | `contains_code_in_language` | fenced block language tag | 0.9 |
/// | `links_to` | link target starting with `http` | 0.8 |
/// | `references_document` | any other link target | 0.7 |
#[derive(Debug, Default, Clone)]
pub struct RegexRelationExtractor;

impl RegexRelationExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl RelationExtractor for RegexRelationExtractor {
    fn extract(&self, subject: &str, text: &str, source: &str) -> Vec<RelationTriplet> {
        let mut out = Vec::new();
        let mut seen: HashSet<(&'static str, String)> = HashSet::new();
        let mut push = |predicate: &'static str, object: String, confidence: f64| {
            if object.is_empty() || !seen.insert((predicate, object.clone())) {
                return;
            }
            out.push(RelationTriplet::new(subject, predicate, object, confidence, source));
        };

        for cap in FENCE_RE.captures_iter(text) {
            push("contains_code_in_language", cap[1].to_lowercase(), 0.9);
        }

        // Inline spans and paths are only meaningful outside fenced blocks.
        let prose = FENCED_BLOCK_RE.replace_all(text, "\n");

        for cap in INLINE_CODE_RE.captures_iter(&prose) {
            push("references_command", cap[1].trim().to_string(), 0.7);
        }

        for cap in CONCEPT_RE.captures_iter(&prose) {
            push("discusses_concept", cap[1].trim().to_string(), 0.6);
        }

        for cap in ABS_PATH_RE.captures_iter(&prose) {
            let path = &cap[1];
            // Require at least two components so "/" alone or "/s" don't count.
            if path.matches('/').count() >= 2 {
                push("references_file", path.to_string(), 0.8);
            }
        }

        for cap in LINK_RE.captures_iter(&prose) {
            let target = cap[2].to_string();
            if target.starts_with("http") {
                push("links_to", target, 0.8);
            } else {
                push("references_document", target, 0.7);
            }
        }

        out
    }
}
