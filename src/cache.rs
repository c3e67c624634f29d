//! Disk-backed content cache for parsed knowledge sources.
//!
//! Each source identity maps to one JSON record under the cache directory:
//!
//! ```text
//! {cache.dir}/
//! ├── markdown__srv_docs_sqli.md-3f9a2c41d07e.json
//! └── man_nmap-8b1e0f6a92cd.json
//! ```
//!
//! A record is `{timestamp, source_mtime, source_path, size, raw_content,
//! parsed_content}`. It is served only while the recorded source mtime is
//! not older than the live file's mtime and the record is younger than the
//! freshness window, and only for the path it was recorded from. Anything
//! else, including an unparsable record, is a miss: the loader runs and the record is rewritten.
//!
//! Records are written to a temp file in the cache directory and renamed
//! into place, so concurrent misses on the same key resolve as
//! last-writer-wins without torn files. There is no count- or size-based
//! eviction.

use chrono::{DateTime, Utc};
use knowledge_harness_core::{KnowledgeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;

/// Output of a cache loader: the raw source text plus its parsed form.
pub struct Loaded<T> {
    pub raw_content: String,
    pub parsed: T,
}

/// Outcome of [`ContentCache::lookup`].
pub enum Lookup<T> {
    Hit(T),
    /// No usable record; `live_mtime` is what [`ContentCache::store`] records.
    Miss { live_mtime: DateTime<Utc> },
}

#[derive(Serialize, Deserialize)]
struct CacheRecord<T> {
    timestamp: DateTime<Utc>,
    source_mtime: DateTime<Utc>,
    source_path: String,
    size: u64,
    raw_content: String,
    parsed_content: T,
}

/// Summary of what is on disk, for `kh cache stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

pub struct ContentCache {
    dir: PathBuf,
    freshness: Duration,
}

impl ContentCache {
    /// Create the cache, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, freshness: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, freshness })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(&config.dir, config.freshness())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File-name-safe key for a source identity: the readable sanitized
    /// identity plus a short digest of the raw one, so identities that
    /// sanitize alike still get distinct keys.
    pub fn key_for(identity: &str) -> String {
        let readable: String = identity
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | ' ' => '_',
                c => c,
            })
            .collect();
        let digest = format!("{:x}", Sha256::digest(identity.as_bytes()));
        format!("{}-{}", readable, &digest[..12])
    }

    fn entry_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key_for(identity)))
    }

    /// Return the cached parse of `source_path`, or run `loader` and persist
    /// its result.
    ///
    /// Fails with `SourceUnavailable` only when `source_path` cannot be
    /// stat'ed. Cache read/write problems are logged and never surface.
    pub fn get<T, F>(&self, identity: &str, source_path: &Path, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<Loaded<T>>,
    {
        match self.lookup(identity, source_path)? {
            Lookup::Hit(parsed) => Ok(parsed),
            Lookup::Miss { live_mtime } => {
                Ok(self.store(identity, source_path, live_mtime, loader()?))
            }
        }
    }

    /// First half of [`get`](Self::get), for callers whose loader is async.
    pub fn lookup<T: DeserializeOwned>(&self, identity: &str, source_path: &Path) -> Result<Lookup<T>> {
        let live_mtime: DateTime<Utc> = std::fs::metadata(source_path)
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .map_err(|e| {
                KnowledgeError::unavailable(identity, format!("{}: {}", source_path.display(), e))
            })?;

        match self.read_record::<T>(identity) {
            Ok(Some(record)) if self.is_valid(&record, source_path, live_mtime) => {
                debug!(identity, "content cache hit");
                return Ok(Lookup::Hit(record.parsed_content));
            }
            Ok(_) => debug!(identity, "content cache miss"),
            Err(e) => warn!(identity, error = %e, "ignoring unreadable cache entry"),
        }
        Ok(Lookup::Miss { live_mtime })
    }

    /// Persist a freshly loaded entry after a [`Lookup::Miss`].
    pub fn store<T: Serialize>(
        &self,
        identity: &str,
        source_path: &Path,
        live_mtime: DateTime<Utc>,
        loaded: Loaded<T>,
    ) -> T {
        let record = CacheRecord {
            timestamp: Utc::now(),
            source_mtime: live_mtime,
            source_path: source_path.display().to_string(),
            size: loaded.raw_content.len() as u64,
            raw_content: loaded.raw_content,
            parsed_content: loaded.parsed,
        };
        if let Err(e) = self.write_record(identity, &record) {
            warn!(identity, error = %e, "failed to persist cache entry");
        }
        record.parsed_content
    }

    fn is_valid<T>(
        &self,
        record: &CacheRecord<T>,
        source_path: &Path,
        live_mtime: DateTime<Utc>,
    ) -> bool {
        if record.source_path != source_path.display().to_string() {
            return false;
        }
        let age = Utc::now().signed_duration_since(record.timestamp);
        let window = chrono::Duration::from_std(self.freshness).unwrap_or(chrono::Duration::MAX);
        record.source_mtime >= live_mtime && age < window
    }

    fn read_record<T: DeserializeOwned>(&self, identity: &str) -> Result<Option<CacheRecord<T>>> {
        let path = self.entry_path(identity);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| KnowledgeError::CacheCorrupt {
                key: Self::key_for(identity),
                reason: e.to_string(),
            })
    }

    fn write_record<T: Serialize>(&self, identity: &str, record: &CacheRecord<T>) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, record).map_err(std::io::Error::from)?;
            writer.flush()?;
        }
        tmp.persist(self.entry_path(identity))
            .map_err(|e| KnowledgeError::Io(e.error))?;
        Ok(())
    }

    /// Drop the entry for one identity. Returns `true` if one existed.
    pub fn invalidate(&self, identity: &str) -> Result<bool> {
        match std::fs::remove_file(self.entry_path(identity)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files()? {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for path in self.entry_files()? {
            stats.entries += 1;
            stats.total_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }
        Ok(stats)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}
