//! rag-core - Core types and traits for the retrieval pipeline
//!
//! This crate provides the document and ranking types, the interfaces of the
//! external collaborators (document store, vector index, embedder, re-ranker,
//! term expander), configuration and error handling shared by the
//! rag-search crates.

pub mod config;
pub mod error;
pub mod text;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use text::tokenize;
pub use traits::*;
pub use types::*;
