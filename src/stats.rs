//! Content cache overview and maintenance for `kh cache`.
//!
//! Reports how many cache entries exist and how much disk they use, and
//! clears them on request. Entries are never required for correctness: a
//! cleared cache is simply rebuilt on the next load.

use anyhow::{Context, Result};

use crate::cache::ContentCache;

/// Print entry count, disk usage, and freshness window.
pub fn run_cache_stats(cache: &ContentCache, freshness_hours: u64) -> Result<()> {
    let stats = cache
        .stats()
        .with_context(|| format!("Failed to read cache dir: {}", cache.dir().display()))?;

    println!("Knowledge Harness: Content Cache");
    println!("================================");
    println!();
    println!("  Directory:   {}", cache.dir().display());
    println!("  Entries:     {}", stats.entries);
    println!("  Size:        {}", format_bytes(stats.total_bytes));
    println!("  Freshness:   {}h", freshness_hours);

    Ok(())
}

pub fn run_cache_clear(cache: &ContentCache) -> Result<()> {
    let removed = cache
        .clear()
        .with_context(|| format!("Failed to clear cache dir: {}", cache.dir().display()))?;
    println!("cache cleared: {} entries removed", removed);
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
