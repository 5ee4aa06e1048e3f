//! Interfaces of the external collaborators the pipeline calls.
//!
//! Every method is a potential suspension point. Implementations own their
//! own retries; the pipeline only applies a timeout around each call.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{QueryExpansion, RankedList, ScoredDocument, SearchFilters, TermSuggestion};

/// Keyword-searchable document snapshot.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch every document passing the filters, without scores.
    async fn fetch_corpus(&self, filters: &SearchFilters) -> Result<Vec<ScoredDocument>>;
}

/// Distance-ranked candidate retrieval.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `limit` documents passing the filters, closest first,
    /// with `vector_score` set.
    async fn vector_search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>>;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Relevance refinement over a bounded candidate set.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rank `candidates` against `query`, returning at most `top_n` ids with
    /// their rerank score as the entry score.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[ScoredDocument],
        top_n: usize,
    ) -> Result<RankedList>;
}

/// Query enrichment and fallback suggestions.
#[async_trait]
pub trait TermExpander: Send + Sync {
    /// Normalize and enrich a raw query.
    async fn expand_terms(&self, query: &str) -> Result<QueryExpansion>;

    /// Offer alternative terms for a query that found too little.
    async fn suggest_terms(&self, query: &str, limit: usize) -> Result<Vec<TermSuggestion>>;
}
