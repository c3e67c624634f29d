//! Source listing for `kh sources` and `kh collections`.

use anyhow::Result;

use crate::registry::SourceRegistry;

pub async fn list_sources(registry: &SourceRegistry) -> Result<()> {
    let stats = registry.statistics().await;

    println!(
        "{:<20} {:<10} {:<12} {:>8} {:>6} {:>9}",
        "SOURCE", "TYPE", "STATUS", "PRIORITY", "DOCS", "TRIPLETS"
    );
    for s in &stats.sources {
        println!(
            "{:<20} {:<10} {:<12} {:>8} {:>6} {:>9}",
            s.name,
            s.source_type,
            s.status.label(),
            s.priority,
            s.document_count,
            s.triplet_count
        );
        if let Some(reason) = s.status.reason() {
            println!("    reason: {}", reason);
        }
        if let Some(err) = &s.error {
            println!("    error: {}", err);
        }
    }

    if stats.sources.is_empty() {
        println!("(no sources configured)");
    }
    println!();
    println!(
        "total: {} sources, {} documents, {} triplets",
        stats.total_sources, stats.total_documents, stats.total_triplets
    );

    Ok(())
}

pub async fn list_collections(registry: &SourceRegistry) -> Result<()> {
    let by_source = registry.collections_by_source().await;
    if by_source.is_empty() {
        println!("(no ready sources)");
        return Ok(());
    }

    for (source, collections) in &by_source {
        println!("{}", source);
        for collection in collections {
            println!("  {}", collection);
        }
    }

    Ok(())
}
