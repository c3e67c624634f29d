//! # Knowledge Harness CLI (`kh`)
//!
//! The `kh` binary inspects configured knowledge sources, populates the
//! retrieval backends, and prints the context that would be handed to a
//! language model for a given query.
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh sources` | List sources with status, priority, and counts |
//! | `kh collections` | List collections per ready source |
//! | `kh ingest` | Aggregate all sources into the backends |
//! | `kh entities "<query>"` | Print the entities recognized in a query |
//! | `kh context "<query>"` | Print the assembled context for a query |
//! | `kh cache stats` | Show content cache usage |
//! | `kh cache clear` | Remove every content cache entry |
//!
//! ## Examples
//!
//! ```bash
//! # Check which sources loaded
//! kh sources --config ./config/kh.toml
//!
//! # Count what an ingest would produce
//! kh ingest --dry-run
//!
//! # Context without the knowledge graph, capped at 2000 characters
//! kh context "blind sql injection" --no-graph --max-length 2000
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowledge_harness::assembler::{ContextAssembler, ContextOptions};
use knowledge_harness::cache::ContentCache;
use knowledge_harness::config::{self, Config};
use knowledge_harness::core::backend::memory::{InMemoryGraph, InMemorySimilarityStore};
use knowledge_harness::core::entities::extract_entities;
use knowledge_harness::ingest;
use knowledge_harness::registry::SourceRegistry;
use knowledge_harness::{sources, stats};

/// Knowledge Harness CLI: knowledge aggregation and bounded context
/// assembly for security-exercise chat assistants.
///
/// All commands except `entities` read a TOML configuration file given by
/// `--config`. See `config/kh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kh",
    about = "Knowledge Harness: knowledge aggregation and bounded context assembly",
    version,
    long_about = "Knowledge Harness loads Markdown guides, manual pages, and an attack-technique \
    taxonomy through source adapters, pushes documents and relation triplets into similarity \
    and graph backends, and assembles a length-bounded context for each query."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kh.toml")]
    config: PathBuf,

    /// Enable debug logging on stderr (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured sources with status, priority, and counts.
    Sources,

    /// List the collections offered by each ready source.
    Collections,

    /// Aggregate every ready source into the retrieval backends.
    ///
    /// Documents are chunked per `retrieval.chunk_size` and
    /// `retrieval.chunk_overlap`; triplets are loaded into the graph.
    Ingest {
        /// Only report counts; write nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the typed entities recognized in a query.
    Entities {
        /// Query text.
        query: String,
    },

    /// Build the knowledge base in memory and print the assembled context.
    Context {
        /// Query text.
        query: String,

        /// Maximum context length in characters.
        #[arg(long)]
        max_length: Option<usize>,

        /// Skip the knowledge graph.
        #[arg(long)]
        no_graph: bool,

        /// Skip similarity search.
        #[arg(long)]
        no_similarity: bool,

        /// Maximum number of similarity hits.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Inspect or clear the content cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and disk usage.
    Stats,
    /// Remove every cached entry.
    Clear,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_entities(query: &str) {
    let entities = extract_entities(query);
    if entities.is_empty() {
        println!("(no entities)");
    }
    for entity in &entities {
        println!("{:<12} {}", entity.kind.as_str(), entity.value);
    }
}

async fn build_registry(cfg: &Config) -> anyhow::Result<SourceRegistry> {
    let cache = Arc::new(ContentCache::from_config(&cfg.cache)?);
    Ok(SourceRegistry::from_config(cfg, cache).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // `entities` works without a config file
    let cfg = if matches!(cli.command, Commands::Entities { .. }) {
        Config::default()
    } else {
        config::load_config(&cli.config)?
    };

    match cli.command {
        Commands::Entities { query } => print_entities(&query),
        Commands::Sources => {
            let registry = build_registry(&cfg).await?;
            sources::list_sources(&registry).await?;
        }
        Commands::Collections => {
            let registry = build_registry(&cfg).await?;
            sources::list_collections(&registry).await?;
        }
        Commands::Ingest { dry_run } => {
            let registry = build_registry(&cfg).await?;
            let similarity = InMemorySimilarityStore::new();
            let graph = InMemoryGraph::new();
            let report =
                ingest::sync_backends(&registry, &similarity, &graph, &cfg.retrieval, dry_run)
                    .await;
            ingest::print_report(&report, dry_run);
        }
        Commands::Context {
            query,
            max_length,
            no_graph,
            no_similarity,
            limit,
        } => {
            let registry = build_registry(&cfg).await?;
            let similarity = Arc::new(InMemorySimilarityStore::new());
            let graph = Arc::new(InMemoryGraph::new());
            let report = ingest::sync_backends(
                &registry,
                similarity.as_ref(),
                graph.as_ref(),
                &cfg.retrieval,
                false,
            )
            .await;
            for err in &report.errors {
                eprintln!("warning: {}", err);
            }

            let assembler = ContextAssembler::new(similarity, graph, cfg.retrieval.clone());
            let options = ContextOptions {
                max_length,
                include_graph: !no_graph,
                include_similarity: !no_similarity,
                max_results: limit,
            };
            let context = assembler.get_enhanced_context(&query, &options).await;
            if context.is_empty() {
                eprintln!("(no relevant context)");
            } else {
                println!("{}", context);
            }
        }
        Commands::Cache { action } => {
            let cache = ContentCache::from_config(&cfg.cache)?;
            match action {
                CacheAction::Stats => stats::run_cache_stats(&cache, cfg.cache.freshness_hours)?,
                CacheAction::Clear => stats::run_cache_clear(&cache)?,
            }
        }
    }

    Ok(())
}
