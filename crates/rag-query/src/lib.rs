//! rag-query - Search and ranking engine
//!
//! This crate provides hybrid search combining BM25 keyword scoring and
//! vector similarity using Reciprocal Rank Fusion (RRF).
//!
//! # Features
//!
//! - BM25 scoring with bounded top-k selection
//! - Weighted Reciprocal Rank Fusion for combining rankings
//! - Concurrent retrieval passes with per-call timeouts
//! - Graceful degradation recorded as per-stage outcomes
//! - Sufficiency check with alternative-term suggestions
//! - Synonym-dictionary query expansion
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::{HybridSearchEngine, SearchRequest};
//! use std::sync::Arc;
//!
//! let engine = HybridSearchEngine::new(Arc::new(store), config)
//!     .with_vector_index(Arc::new(index))
//!     .with_cache(Arc::new(cache));
//! let result = engine.search(&SearchRequest::new("pressure ulcer care")).await;
//! ```

mod bm25;
mod deadline;
mod engine;
mod expansion;
mod fusion;
mod validate;

pub use bm25::{Bm25Params, Bm25Scorer};
pub use deadline::bounded;
pub use engine::{HybridSearchEngine, SearchRequest, EMBEDDING_NAMESPACE, RESULT_NAMESPACE};
pub use expansion::{DictionaryExpander, TermEntry};
pub use fusion::{rrf_contribution, FusedEntry, FusionWeights, RankFusion, RRF_K};
pub use validate::{ResultValidator, Validation};

// Re-export for convenience
pub use rag_core::{SearchResult, ScoredDocument};
