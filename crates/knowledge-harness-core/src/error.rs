//! Error taxonomy shared by adapters, the cache, and retrieval backends.
//!
//! None of these errors escape the context assembler. They exist so the
//! registry and assembler can decide *which* contribution to degrade.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// An adapter cannot load: host tool missing, file missing or unreadable.
    #[error("source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// Source configuration failed validation.
    #[error("invalid config for source '{source_name}': {reason}")]
    ConfigInvalid { source_name: String, reason: String },

    /// A similarity or graph backend call failed or timed out.
    #[error("{backend} backend unreachable: {reason}")]
    BackendUnreachable { backend: String, reason: String },

    /// A persisted cache entry could not be parsed.
    #[error("cache entry '{key}' corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KnowledgeError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}
