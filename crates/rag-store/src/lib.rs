//! rag-store - In-memory document store and vector index
//!
//! This crate provides the reference implementations of the corpus and
//! vector-search collaborators: a filtered document snapshot for BM25 and
//! a brute-force cosine-similarity index.

mod cosine;
mod memory;

pub use cosine::cosine_similarity;
pub use memory::{CorpusRecord, MemoryStore};
