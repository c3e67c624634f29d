//! # Knowledge Harness Core
//!
//! Runtime-free logic for Knowledge Harness: data models, the error
//! taxonomy, content truncation, query entity recognition, chunking, and
//! the retrieval backend abstraction.
//!
//! This crate contains no tokio runtime, filesystem I/O, or process
//! spawning. Source adapters, the content cache, and the context
//! assembler live in the `knowledge-harness` app crate.

pub mod backend;
pub mod chunk;
pub mod entities;
pub mod error;
pub mod models;
pub mod truncate;

pub use error::{KnowledgeError, Result};
