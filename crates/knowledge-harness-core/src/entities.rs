//! Typed entity recognition over raw query text.
//!
//! Each recognizer is a compiled regex producing one [`EntityKind`]. The
//! result is a sorted, deduplicated set; an empty set is a valid outcome
//! and means no graph expansion is attempted for the query.
//!
//! | Kind | Matches |
//! |------|---------|
//! | `ip_address` | dotted IPv4, each octet `0..=255` |
//! | `url` | `http(s)://` and `ftp://` URLs |
//! | `email` | `local@domain.tld` |
//! | `hash` | 32, 40 or 64 hex digits (MD5 / SHA-1 / SHA-256) |
//! | `filename` | `name.ext` with a known file extension |
//! | `port` | `port 80`, `ports 22`, `:8080` after a host or IP |

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::models::{Entity, EntityKind};

static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
        .expect("ip regex")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:https?|ftp)://[^\s<>"'`]+"#).expect("url regex"));

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});

static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[0-9a-fA-F]{64}|[0-9a-fA-F]{40}|[0-9a-fA-F]{32})\b").expect("hash regex"));

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[\w-]+\.(?:exe|dll|so|sh|bash|py|pl|rb|ps1|bat|cmd|vbs|js|php|asp|aspx|jsp|jar|war|elf|bin|txt|log|conf|cfg|ini|xml|json|ya?ml|sql|db|zip|tar|gz|tgz|rar|7z|pdf|docx?|xlsx?|pcap|pem|key|crt|html?|md|c|cpp|h)\b",
    )
    .expect("filename regex")
});

static PORT_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bports?\s+(\d{1,5})\b").expect("port regex"));

static PORT_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\d{1,3}(?:\.\d{1,3}){3}|\blocalhost|[A-Za-z0-9-]+\.[A-Za-z]{2,}):(\d{1,5})\b").expect("port suffix regex"));

/// Extract all typed entities from `text`.
///
/// # Example
///
/// ```rust
/// use knowledge_harness_core::entities::extract_entities;
/// use knowledge_harness_core::models::EntityKind;
///
/// let found = extract_entities("scan 10.0.0.5 on port 445");
/// assert!(found.iter().any(|e| e.kind == EntityKind::IpAddress && e.value == "10.0.0.5"));
/// assert!(found.iter().any(|e| e.kind == EntityKind::Port && e.value == "445"));
/// ```
pub fn extract_entities(text: &str) -> BTreeSet<Entity> {
    let mut found = BTreeSet::new();

    let urls: Vec<&str> = URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ')', ']']))
        .collect();
    for url in &urls {
        found.insert(Entity::new(EntityKind::Url, *url));
    }

    for m in IP_RE.find_iter(text) {
        found.insert(Entity::new(EntityKind::IpAddress, m.as_str()));
    }

    for m in EMAIL_RE.find_iter(text) {
        found.insert(Entity::new(EntityKind::Email, m.as_str()));
    }

    for m in HASH_RE.find_iter(text) {
        found.insert(Entity::new(EntityKind::Hash, m.as_str().to_lowercase()));
    }

    for m in FILENAME_RE.find_iter(text) {
        // Domains inside an email address are not files.
        let inside_email = EMAIL_RE
            .find_iter(text)
            .any(|e| e.start() <= m.start() && m.end() <= e.end());
        if !inside_email {
            found.insert(Entity::new(EntityKind::Filename, m.as_str()));
        }
    }

    for caps in PORT_WORD_RE
        .captures_iter(text)
        .chain(PORT_SUFFIX_RE.captures_iter(text))
    {
        if let Some(port) = caps.get(1) {
            if valid_port(port.as_str()) {
                found.insert(Entity::new(EntityKind::Port, port.as_str()));
            }
        }
    }

    found
}

fn valid_port(s: &str) -> bool {
    s.parse::<u32>().is_ok_and(|p| (1..=65535).contains(&p))
}
