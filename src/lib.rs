//! # Knowledge Harness
//!
//! Knowledge aggregation and bounded context assembly for chat assistants
//! that support security exercises.
//!
//! Knowledge Harness turns a set of heterogeneous sources (Markdown
//! guides, rendered manual pages, a static attack-technique taxonomy) into
//! retrieval documents and relation triplets, pushes them into a similarity
//! backend and a knowledge-graph backend, and builds a single
//! length-bounded context string for each user query.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Adapters   │──▶│   Registry   │──▶│ Similarity + Graph │
//! │ md/man/attck│   │ status/merge │   │      backends      │
//! └──────┬──────┘   └──────────────┘   └─────────┬──────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌─────────────┐                      ┌────────────────────┐
//! │Content Cache│                      │ Context Assembler  │
//! │ (JSON files)│                      │ entities+truncate  │
//! └─────────────┘                      └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kh sources                        # list sources and their status
//! kh ingest --dry-run               # count documents, chunks, triplets
//! kh entities "scan 10.0.0.5:8080"  # show recognized entities
//! kh context "sql injection"        # print the assembled context
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`cache`] | File-backed content cache with freshness checks |
//! | [`traits`] | The `SourceAdapter` extension trait |
//! | [`relations`] | Pluggable relation extraction from text |
//! | [`adapter_markdown`] | Markdown directory adapter |
//! | [`adapter_manpage`] | Manual page adapter |
//! | [`adapter_taxonomy`] | Static attack-technique taxonomy adapter |
//! | [`registry`] | Adapter registration, status, and aggregation |
//! | [`ingest`] | Chunking and backend population |
//! | [`assembler`] | Query-time context assembly |
//! | [`sources`] | `kh sources` / `kh collections` output |
//! | [`stats`] | `kh cache` output |
//!
//! Runtime-free pieces (models, errors, truncation, entity recognition,
//! chunking, backend traits) live in `knowledge_harness_core` and are
//! re-exported here as [`core`].

pub mod adapter_manpage;
pub mod adapter_markdown;
pub mod adapter_taxonomy;
pub mod assembler;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod registry;
pub mod relations;
pub mod sources;
pub mod stats;
pub mod traits;

pub use knowledge_harness_core as core;
