//! rag-embed - Deterministic text embeddings
//!
//! This crate provides a dependency-free embedder for query and document
//! vectors, used by the in-memory vector index and by tests.
//!
//! # Features
//!
//! - Token feature hashing with BLAKE3
//! - Same tokenizer as the BM25 scorer
//! - L2 normalization
//! - Batch embedding support

mod hashing;

pub use hashing::HashEmbedder;

// Re-export the Embedder trait for convenience
pub use rag_core::Embedder;
