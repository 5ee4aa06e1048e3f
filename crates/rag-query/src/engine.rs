//! Hybrid search orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rag_cache::{fingerprint, CacheService};
use rag_core::{
    tokenize, DocumentStore, Embedder, PipelineMetrics, PipelineStage, QueryExpansion, RagConfig,
    RagError, RankedList, Reranker, Result, ScoredDocument, SearchFilters, SearchResult,
    StageOutcome, TermExpander, VectorIndex,
};

use crate::bm25::Bm25Scorer;
use crate::deadline::bounded;
use crate::fusion::RankFusion;
use crate::validate::ResultValidator;

/// Cache namespace of finished search results.
pub const RESULT_NAMESPACE: &str = "search";

/// Cache namespace of query embeddings.
pub const EMBEDDING_NAMESPACE: &str = "embeddings";

/// A single search invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default)]
    pub filters: SearchFilters,

    /// Number of documents to return (config default if unset).
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Precomputed query embedding. When absent the engine's embedder is used.
    #[serde(default, skip_serializing)]
    pub query_vector: Option<Vec<f32>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_query_vector(mut self, vector: Vec<f32>) -> Self {
        self.query_vector = Some(vector);
        self
    }
}

/// Output of one retrieval pass.
struct Retrieval {
    documents: Vec<ScoredDocument>,
    ranked: RankedList,
    corpus_size: usize,
    elapsed: Duration,
    outcome: StageOutcome,
}

impl Retrieval {
    fn succeeded(
        documents: Vec<ScoredDocument>,
        ranked: RankedList,
        corpus_size: usize,
        elapsed: Duration,
    ) -> Self {
        Self {
            documents,
            ranked,
            corpus_size,
            elapsed,
            outcome: StageOutcome::Succeeded,
        }
    }

    fn failed(error: &RagError, elapsed: Duration) -> Self {
        Self {
            documents: Vec::new(),
            ranked: RankedList::new(),
            corpus_size: 0,
            elapsed,
            outcome: StageOutcome::failed(error.to_string()),
        }
    }

    fn skipped() -> Self {
        Self {
            documents: Vec::new(),
            ranked: RankedList::new(),
            corpus_size: 0,
            elapsed: Duration::ZERO,
            outcome: StageOutcome::Skipped,
        }
    }

    fn is_failed(&self) -> bool {
        self.outcome.is_failed()
    }
}

/// Hybrid search engine.
///
/// Runs BM25 over a corpus snapshot and a vector search concurrently, fuses
/// both rankings with Reciprocal Rank Fusion (RRF), optionally re-ranks the
/// bounded candidate set and validates the outcome. Collaborator failures
/// degrade the affected stage and are reported in the result's metrics;
/// `search` itself never fails.
pub struct HybridSearchEngine {
    /// Corpus source for the keyword pass.
    store: Arc<dyn DocumentStore>,

    vector_index: Option<Arc<dyn VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    expander: Option<Arc<dyn TermExpander>>,

    /// Shared result and embedding cache.
    cache: Option<Arc<CacheService>>,

    config: RagConfig,
    scorer: Bm25Scorer,
    fusion: RankFusion,
    validator: ResultValidator,
}

impl HybridSearchEngine {
    /// Create an engine with only the keyword pass wired.
    pub fn new(store: Arc<dyn DocumentStore>, config: RagConfig) -> Self {
        Self {
            store,
            vector_index: None,
            embedder: None,
            reranker: None,
            expander: None,
            cache: None,
            scorer: Bm25Scorer::from_config(&config.search),
            fusion: RankFusion::from_config(&config.search),
            validator: ResultValidator::from_config(&config.search),
            config,
        }
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_expander(mut self, expander: Arc<dyn TermExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<CacheService>> {
        self.cache.as_ref()
    }

    fn timeout(&self) -> Duration {
        self.config.search.collaborator_timeout()
    }

    /// Run a search through every pipeline stage.
    pub async fn search(&self, request: &SearchRequest) -> SearchResult {
        let start = Instant::now();
        let top_k = self.config.search.resolve_top_k(request.top_k);

        info!("Searching for: {:?} (top_k={})", request.query, top_k);

        let cache_key = self.result_key(request, top_k);
        if let Some(hit) = self.cached_result(cache_key.as_deref(), start) {
            return hit;
        }

        let mut metrics = PipelineMetrics::new();

        // Preprocess
        let stage = Instant::now();
        let (expansion, outcome) = self.preprocess(&request.query).await;
        metrics.record(PipelineStage::Preprocess, stage.elapsed(), outcome);
        debug!("Expanded query: {:?}", expansion.expanded_query);

        // Retrieve
        let (keyword, vector) = tokio::join!(
            self.keyword_pass(&expansion.expanded_query, &request.filters),
            self.vector_pass(&expansion.expanded_query, request)
        );

        debug!(
            "Keyword search returned {} results, vector search returned {} results",
            keyword.ranked.len(),
            vector.ranked.len()
        );

        metrics.candidates.corpus = keyword.corpus_size;
        metrics.candidates.keyword = keyword.ranked.len();
        metrics.candidates.vector = vector.ranked.len();
        metrics.record(
            PipelineStage::KeywordRetrieval,
            keyword.elapsed,
            keyword.outcome.clone(),
        );
        metrics.record(
            PipelineStage::VectorRetrieval,
            vector.elapsed,
            vector.outcome.clone(),
        );

        let retrieval_failed = keyword.is_failed() || vector.is_failed();
        let documents = if keyword.is_failed() && vector.is_failed() {
            warn!("Both retrieval passes failed, returning an empty result");
            metrics.record(PipelineStage::Fusion, Duration::ZERO, StageOutcome::Skipped);
            metrics.record(PipelineStage::Rerank, Duration::ZERO, StageOutcome::Skipped);
            Vec::new()
        } else {
            // Fuse
            let stage = Instant::now();
            let fusion_outcome = fusion_outcome(&keyword, &vector);
            let candidates = self.fuse(keyword, vector);
            metrics.candidates.fused = candidates.len();
            metrics.record(PipelineStage::Fusion, stage.elapsed(), fusion_outcome);
            debug!("Fused to {} candidates", candidates.len());

            // Rerank
            let stage = Instant::now();
            let (documents, outcome) = self.rerank(&request.query, candidates, top_k).await;
            if !matches!(outcome, StageOutcome::Skipped) {
                metrics.candidates.reranked = documents.len();
            }
            metrics.record(PipelineStage::Rerank, stage.elapsed(), outcome);
            documents
        };

        // Validate
        let stage = Instant::now();
        let validation = self
            .validator
            .validate(&request.query, &documents, self.expander.as_deref())
            .await;
        metrics.record(PipelineStage::Validate, stage.elapsed(), validation.outcome);

        metrics.candidates.returned = documents.len();
        metrics.total_duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Search returned {} documents in {:.1}ms",
            documents.len(),
            metrics.total_duration_ms
        );

        let result = SearchResult {
            query: request.query.clone(),
            expanded_query: expansion.expanded_query,
            documents,
            sufficient: validation.sufficient,
            suggested_terms: validation.suggestions,
            cached: false,
            metrics,
        };

        if retrieval_failed {
            debug!("Not caching a result with a failed retrieval pass");
        } else {
            self.store_result(cache_key.as_deref(), &result);
        }

        result
    }

    fn result_key(&self, request: &SearchRequest, top_k: usize) -> Option<String> {
        if !self.config.search.cache_results || self.cache.is_none() {
            return None;
        }
        match fingerprint(&(&request.query, &request.filters, top_k)) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Could not derive a result cache key: {}", e);
                None
            }
        }
    }

    /// Serve a stored result with metrics describing this invocation only.
    fn cached_result(&self, key: Option<&str>, start: Instant) -> Option<SearchResult> {
        let (cache, key) = (self.cache.as_ref()?, key?);
        let lookup = Instant::now();
        let mut hit = cache.get::<SearchResult>(RESULT_NAMESPACE, key)?;

        let mut metrics = PipelineMetrics::new();
        metrics.record(
            PipelineStage::CacheLookup,
            lookup.elapsed(),
            StageOutcome::Succeeded,
        );
        metrics.candidates.returned = hit.documents.len();
        metrics.total_duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Returning cached result for {:?} in {:.1}ms",
            hit.query, metrics.total_duration_ms
        );
        hit.metrics = metrics;
        hit.cached = true;
        Some(hit)
    }

    fn store_result(&self, key: Option<&str>, result: &SearchResult) {
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), key) {
            cache.set(
                RESULT_NAMESPACE,
                key,
                result.clone(),
                self.config.search.result_ttl(),
            );
        }
    }

    async fn preprocess(&self, query: &str) -> (QueryExpansion, StageOutcome) {
        let query = query.trim();

        let (mut expansion, mut outcome) = match &self.expander {
            None => (QueryExpansion::passthrough(query), StageOutcome::Skipped),
            Some(expander) => {
                match bounded("term-expander", self.timeout(), expander.expand_terms(query)).await {
                    Ok(expansion) => (expansion, StageOutcome::Succeeded),
                    Err(e) => {
                        warn!("Query expansion failed, using the query as given: {}", e);
                        (
                            QueryExpansion::passthrough(query),
                            StageOutcome::degraded(e.to_string()),
                        )
                    }
                }
            }
        };

        if expansion.expanded_query.trim().is_empty() {
            expansion.expanded_query = query.to_string();
        }

        if tokenize(&expansion.expanded_query).is_empty() {
            let error = RagError::InvalidQuery {
                query: query.to_string(),
            };
            warn!("{}", error);
            outcome = StageOutcome::degraded(error.to_string());
        }

        (expansion, outcome)
    }

    async fn keyword_pass(&self, query: &str, filters: &SearchFilters) -> Retrieval {
        let started = Instant::now();

        let corpus = match bounded(
            "document-store",
            self.timeout(),
            self.store.fetch_corpus(filters),
        )
        .await
        {
            Ok(corpus) => corpus,
            Err(e) => {
                warn!("Keyword retrieval failed: {}", e);
                return Retrieval::failed(&e, started.elapsed());
            }
        };

        let ranked = self
            .scorer
            .rank(query, &corpus, self.config.search.bm25_top_k);
        let corpus_size = corpus.len();

        let mut by_id: HashMap<String, ScoredDocument> = HashMap::with_capacity(corpus_size);
        for doc in corpus {
            by_id.entry(doc.id.clone()).or_insert(doc);
        }

        let documents = ranked
            .iter()
            .filter_map(|entry| {
                let mut doc = by_id.remove(&entry.id)?.without_scores();
                doc.bm25_score = Some(entry.score);
                Some(doc)
            })
            .collect();

        Retrieval::succeeded(documents, ranked, corpus_size, started.elapsed())
    }

    async fn vector_pass(&self, query: &str, request: &SearchRequest) -> Retrieval {
        let Some(index) = &self.vector_index else {
            return Retrieval::skipped();
        };
        let started = Instant::now();

        let query_vector = match &request.query_vector {
            Some(vector) => vector.clone(),
            None => {
                let Some(embedder) = &self.embedder else {
                    debug!("No query vector and no embedder, skipping vector search");
                    return Retrieval::skipped();
                };
                match self.embed_query(embedder.as_ref(), query).await {
                    Ok(vector) => vector,
                    Err(e) => {
                        warn!("Query embedding failed: {}", e);
                        return Retrieval::failed(&e, started.elapsed());
                    }
                }
            }
        };

        match bounded(
            "vector-index",
            self.timeout(),
            index.vector_search(
                &query_vector,
                &request.filters,
                self.config.search.dense_top_k,
            ),
        )
        .await
        {
            Ok(documents) => {
                let ranked = RankedList::from_scored(
                    documents
                        .iter()
                        .map(|doc| (doc.id.clone(), doc.vector_score.unwrap_or_default())),
                );
                Retrieval::succeeded(documents, ranked, 0, started.elapsed())
            }
            Err(e) => {
                warn!("Vector retrieval failed: {}", e);
                Retrieval::failed(&e, started.elapsed())
            }
        }
    }

    /// Embed a query, memoized in the shared cache when one is configured.
    async fn embed_query(&self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
        let call = bounded("embedder", self.timeout(), embedder.embed_query(text));
        match &self.cache {
            Some(cache) => {
                cache
                    .memoize(EMBEDDING_NAMESPACE, self.config.cache.embedding_ttl())
                    .call_async(text, || call)
                    .await
            }
            None => call.await,
        }
    }

    /// Fuse both passes and join the fused ids back to their documents,
    /// keeping at most `candidate_limit` candidates.
    fn fuse(&self, keyword: Retrieval, vector: Retrieval) -> Vec<ScoredDocument> {
        let mut fused = self.fusion.fuse(&keyword.ranked, &vector.ranked);
        fused.truncate(self.config.search.candidate_limit);

        let mut pool: HashMap<String, ScoredDocument> =
            HashMap::with_capacity(keyword.documents.len() + vector.documents.len());
        for doc in keyword.documents {
            pool.entry(doc.id.clone()).or_insert(doc);
        }
        for doc in vector.documents {
            match pool.get_mut(&doc.id) {
                Some(existing) => {
                    if existing.vector_score.is_none() {
                        existing.vector_score = doc.vector_score;
                    }
                }
                None => {
                    pool.insert(doc.id.clone(), doc);
                }
            }
        }

        fused
            .into_iter()
            .filter_map(|entry| {
                let mut doc = pool.remove(&entry.id)?;
                doc.rrf_score = Some(entry.rrf_score);
                Some(doc)
            })
            .collect()
    }

    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredDocument>,
        top_k: usize,
    ) -> (Vec<ScoredDocument>, StageOutcome) {
        let reranker = match &self.reranker {
            Some(reranker) if !candidates.is_empty() => reranker,
            _ => {
                candidates.truncate(top_k);
                return (candidates, StageOutcome::Skipped);
            }
        };

        let ranked = match bounded(
            "reranker",
            self.timeout(),
            reranker.rerank(query, &candidates, top_k),
        )
        .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Re-ranking failed, keeping fused order: {}", e);
                candidates.truncate(top_k);
                return (candidates, StageOutcome::degraded(e.to_string()));
            }
        };

        let mut by_id: HashMap<String, ScoredDocument> = candidates
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        let mut documents = Vec::with_capacity(ranked.len().min(top_k));
        for entry in ranked.iter() {
            if documents.len() == top_k {
                break;
            }
            match by_id.remove(&entry.id) {
                Some(mut doc) => {
                    doc.rerank_score = Some(entry.score);
                    documents.push(doc);
                }
                None => debug!("Reranker returned unknown or repeated id {}", entry.id),
            }
        }

        (documents, StageOutcome::Succeeded)
    }
}

fn fusion_outcome(keyword: &Retrieval, vector: &Retrieval) -> StageOutcome {
    let vector_ran = !matches!(vector.outcome, StageOutcome::Skipped);
    if keyword.is_failed() && !vector_ran {
        StageOutcome::Skipped
    } else if keyword.is_failed() {
        StageOutcome::degraded("keyword retrieval failed, fused vector list only")
    } else if vector.is_failed() {
        StageOutcome::degraded("vector retrieval failed, fused keyword list only")
    } else {
        StageOutcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::{DictionaryExpander, TermEntry};
    use async_trait::async_trait;
    use rag_core::ExpansionConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn nursing_corpus() -> Vec<ScoredDocument> {
        vec![
            ScoredDocument::new("d1", "Visit", "visit plan nursing").with_domain("nursing"),
            ScoredDocument::new("d2", "Report", "nursing report").with_domain("nursing"),
            ScoredDocument::new("d3", "Invoice", "monthly billing invoice").with_domain("billing"),
        ]
    }

    #[derive(Default)]
    struct MockStore {
        docs: Vec<ScoredDocument>,
        delay: Option<Duration>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockStore {
        fn with_docs(docs: Vec<ScoredDocument>) -> Self {
            Self {
                docs,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl DocumentStore for MockStore {
        async fn fetch_corpus(&self, filters: &SearchFilters) -> Result<Vec<ScoredDocument>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(RagError::collaborator("document-store", "connection refused"));
            }
            Ok(self
                .docs
                .iter()
                .filter(|d| filters.matches(d))
                .cloned()
                .collect())
        }
    }

    /// Returns documents in a fixed order regardless of the query vector.
    #[derive(Default)]
    struct FixedIndex {
        docs: Vec<ScoredDocument>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl FixedIndex {
        fn ordered(docs: Vec<ScoredDocument>) -> Self {
            Self {
                docs,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn vector_search(
            &self,
            _query_vector: &[f32],
            filters: &SearchFilters,
            limit: usize,
        ) -> Result<Vec<ScoredDocument>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(RagError::collaborator("vector-index", "index offline"));
            }
            let n = self.docs.len();
            Ok(self
                .docs
                .iter()
                .filter(|d| filters.matches(d))
                .take(limit)
                .enumerate()
                .map(|(i, d)| {
                    let mut d = d.clone();
                    d.vector_score = Some(1.0 - i as f64 / n as f64);
                    d
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// Reverses the candidate order.
    struct ReversingReranker;

    #[async_trait]
    impl Reranker for ReversingReranker {
        async fn rerank(
            &self,
            _query: &str,
            candidates: &[ScoredDocument],
            top_n: usize,
        ) -> Result<RankedList> {
            Ok(RankedList::from_scored(
                candidates
                    .iter()
                    .rev()
                    .take(top_n)
                    .enumerate()
                    .map(|(i, d)| (d.id.clone(), 10.0 - i as f64)),
            ))
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _candidates: &[ScoredDocument],
            _top_n: usize,
        ) -> Result<RankedList> {
            Err(RagError::collaborator("reranker", "model overloaded"))
        }
    }

    struct FailingExpander;

    #[async_trait]
    impl TermExpander for FailingExpander {
        async fn expand_terms(&self, _query: &str) -> Result<QueryExpansion> {
            Err(RagError::collaborator("term-expander", "llm unavailable"))
        }

        async fn suggest_terms(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<rag_core::TermSuggestion>> {
            Err(RagError::collaborator("term-expander", "llm unavailable"))
        }
    }

    fn hybrid_engine(store: MockStore, index: FixedIndex) -> HybridSearchEngine {
        HybridSearchEngine::new(Arc::new(store), RagConfig::default())
            .with_vector_index(Arc::new(index))
    }

    fn ids(result: &SearchResult) -> Vec<&str> {
        result.documents.iter().map(|d| d.id.as_str()).collect()
    }

    fn vector_request(query: &str) -> SearchRequest {
        SearchRequest::new(query).with_query_vector(vec![1.0, 0.0])
    }

    #[tokio::test]
    async fn test_nursing_hybrid_search() {
        let corpus = nursing_corpus();
        let index = FixedIndex::ordered(vec![corpus[1].clone(), corpus[0].clone()]);
        let engine = hybrid_engine(MockStore::with_docs(corpus), index);

        let result = engine.search(&vector_request("nursing plan")).await;

        // Equal RRF sums; the id breaks the tie.
        assert_eq!(ids(&result), vec!["d1", "d2"]);
        let expected = 0.5 * (1.0 / 61.0) + 0.5 * (1.0 / 62.0);
        for doc in &result.documents {
            assert!((doc.rrf_score.unwrap() - expected).abs() < 1e-12);
            assert!(doc.bm25_score.unwrap() > 0.0);
            assert!(doc.vector_score.is_some());
            assert!(doc.rerank_score.is_none());
        }
        assert!(result.sufficient);
        assert!(!result.cached);

        let stages: Vec<PipelineStage> = result.metrics.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                PipelineStage::Preprocess,
                PipelineStage::KeywordRetrieval,
                PipelineStage::VectorRetrieval,
                PipelineStage::Fusion,
                PipelineStage::Rerank,
                PipelineStage::Validate,
            ]
        );
        assert_eq!(result.metrics.candidates.corpus, 3);
        assert_eq!(result.metrics.candidates.keyword, 2);
        assert_eq!(result.metrics.candidates.vector, 2);
        assert_eq!(result.metrics.candidates.returned, 2);
        assert!(!result.metrics.has_failures());
    }

    #[tokio::test]
    async fn test_vector_failure_degrades_to_keyword() {
        let engine = hybrid_engine(MockStore::with_docs(nursing_corpus()), FixedIndex::failing());

        let result = engine.search(&vector_request("nursing plan")).await;

        assert_eq!(ids(&result), vec!["d1", "d2"]);
        assert!(result.documents.iter().all(|d| d.vector_score.is_none()));
        assert!(result
            .metrics
            .outcome(PipelineStage::VectorRetrieval)
            .unwrap()
            .is_failed());
        assert!(matches!(
            result.metrics.outcome(PipelineStage::Fusion),
            Some(StageOutcome::Degraded { .. })
        ));
    }

    #[tokio::test]
    async fn test_keyword_failure_degrades_to_vector() {
        let corpus = nursing_corpus();
        let engine = hybrid_engine(MockStore::failing(), FixedIndex::ordered(corpus));

        let result = engine.search(&vector_request("nursing plan").with_top_k(2)).await;

        assert_eq!(ids(&result), vec!["d1", "d2"]);
        assert!(result
            .metrics
            .outcome(PipelineStage::KeywordRetrieval)
            .unwrap()
            .is_failed());
    }

    #[tokio::test]
    async fn test_keyword_failure_without_vector_pass_skips_fusion() {
        let engine = HybridSearchEngine::new(Arc::new(MockStore::failing()), RagConfig::default());

        let result = engine.search(&SearchRequest::new("nursing plan")).await;

        assert!(result.documents.is_empty());
        assert_eq!(
            result.metrics.outcome(PipelineStage::VectorRetrieval),
            Some(&StageOutcome::Skipped)
        );
        assert_eq!(
            result.metrics.outcome(PipelineStage::Fusion),
            Some(&StageOutcome::Skipped)
        );
        assert_eq!(
            result.metrics.outcome(PipelineStage::Rerank),
            Some(&StageOutcome::Skipped)
        );
    }

    #[tokio::test]
    async fn test_both_passes_failing_returns_empty_result() {
        let cache = Arc::new(CacheService::new(16));
        let engine = hybrid_engine(MockStore::failing(), FixedIndex::failing())
            .with_cache(cache.clone());

        let result = engine.search(&vector_request("nursing plan")).await;

        assert!(result.documents.is_empty());
        assert!(!result.sufficient);
        assert!(result.metrics.has_failures());
        assert_eq!(
            result.metrics.outcome(PipelineStage::Fusion),
            Some(&StageOutcome::Skipped)
        );
        assert!(result.metrics.stage(PipelineStage::Validate).is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_vector_index_times_out() {
        let mut config = RagConfig::default();
        config.search.collaborator_timeout_ms = 100;

        let index = FixedIndex {
            docs: nursing_corpus(),
            delay: Some(Duration::from_secs(10)),
            fail: false,
        };
        let engine = HybridSearchEngine::new(
            Arc::new(MockStore::with_docs(nursing_corpus())),
            config,
        )
        .with_vector_index(Arc::new(index));

        let result = engine.search(&vector_request("nursing")).await;

        assert_eq!(ids(&result), vec!["d2", "d1"]);
        match result.metrics.outcome(PipelineStage::VectorRetrieval) {
            Some(StageOutcome::Failed { reason }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected vector outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieval_passes_run_concurrently() {
        let delay = Duration::from_millis(100);
        let store = MockStore {
            docs: nursing_corpus(),
            delay: Some(delay),
            ..MockStore::default()
        };
        let index = FixedIndex {
            docs: nursing_corpus(),
            delay: Some(delay),
            fail: false,
        };
        let engine = hybrid_engine(store, index);

        let started = tokio::time::Instant::now();
        let result = engine.search(&vector_request("nursing")).await;
        let elapsed = started.elapsed();

        assert!(!result.documents.is_empty());
        assert!(elapsed >= delay);
        assert!(elapsed < delay * 2, "passes ran sequentially: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_result_cache_hit() {
        let store = Arc::new(MockStore::with_docs(nursing_corpus()));
        let cache = Arc::new(CacheService::new(16));
        let engine = HybridSearchEngine::new(store.clone(), RagConfig::default())
            .with_cache(cache.clone());

        let request = SearchRequest::new("nursing plan");
        let first = engine.search(&request).await;
        let second = engine.search(&request).await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.documents, second.documents);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // Different top_k is a different cache key.
        engine.search(&request.clone().with_top_k(1)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_reports_its_own_metrics() {
        let store = Arc::new(MockStore {
            docs: nursing_corpus(),
            delay: Some(Duration::from_millis(30)),
            ..MockStore::default()
        });
        let engine = HybridSearchEngine::new(store.clone(), RagConfig::default())
            .with_cache(Arc::new(CacheService::new(16)));

        let request = SearchRequest::new("nursing plan");
        let first = engine.search(&request).await;
        let started = Instant::now();
        let second = engine.search(&request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        assert!(second.cached);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_ne!(first.metrics, second.metrics);

        assert!(first.metrics.total_duration_ms >= 30.0);
        assert!(second.metrics.total_duration_ms <= elapsed_ms);
        assert!(second.metrics.total_duration_ms < first.metrics.total_duration_ms);

        let stages: Vec<PipelineStage> = second.metrics.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec![PipelineStage::CacheLookup]);
        assert_eq!(
            second.metrics.outcome(PipelineStage::CacheLookup),
            Some(&StageOutcome::Succeeded)
        );
        assert_eq!(second.metrics.candidates.returned, second.documents.len());
        assert_eq!(second.metrics.candidates.corpus, 0);

        // Repeated hits report only their own lookup.
        let third = engine.search(&request).await;
        assert_eq!(third.metrics.stages.len(), 1);
        assert_eq!(third.documents, first.documents);
    }

    #[tokio::test]
    async fn test_result_caching_can_be_disabled() {
        let store = Arc::new(MockStore::with_docs(nursing_corpus()));
        let mut config = RagConfig::default();
        config.search.cache_results = false;
        let engine = HybridSearchEngine::new(store.clone(), config)
            .with_cache(Arc::new(CacheService::new(16)));

        let request = SearchRequest::new("nursing plan");
        engine.search(&request).await;
        engine.search(&request).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_query_embedding_is_memoized() {
        let embedder = Arc::new(CountingEmbedder::default());
        let engine = hybrid_engine(
            MockStore::with_docs(nursing_corpus()),
            FixedIndex::ordered(nursing_corpus()),
        )
        .with_embedder(embedder.clone())
        .with_cache(Arc::new(CacheService::new(16)));

        engine.search(&SearchRequest::new("nursing").with_top_k(1)).await;
        engine.search(&SearchRequest::new("nursing").with_top_k(2)).await;

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_precomputed_vector_bypasses_embedder() {
        let embedder = Arc::new(CountingEmbedder::default());
        let engine = hybrid_engine(
            MockStore::with_docs(nursing_corpus()),
            FixedIndex::ordered(nursing_corpus()),
        )
        .with_embedder(embedder.clone());

        engine.search(&vector_request("nursing")).await;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vector_pass_skipped_without_vector_or_embedder() {
        let engine = hybrid_engine(
            MockStore::with_docs(nursing_corpus()),
            FixedIndex::ordered(nursing_corpus()),
        );

        let result = engine.search(&SearchRequest::new("nursing plan")).await;

        assert_eq!(ids(&result), vec!["d1", "d2"]);
        assert_eq!(
            result.metrics.outcome(PipelineStage::VectorRetrieval),
            Some(&StageOutcome::Skipped)
        );
        assert_eq!(
            result.metrics.outcome(PipelineStage::Fusion),
            Some(&StageOutcome::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_reranker_reorders_and_scores() {
        let engine = HybridSearchEngine::new(
            Arc::new(MockStore::with_docs(nursing_corpus())),
            RagConfig::default(),
        )
        .with_reranker(Arc::new(ReversingReranker));

        let result = engine.search(&SearchRequest::new("nursing plan")).await;

        assert_eq!(ids(&result), vec!["d2", "d1"]);
        assert_eq!(result.documents[0].rerank_score, Some(10.0));
        assert_eq!(result.metrics.candidates.reranked, 2);
    }

    #[tokio::test]
    async fn test_reranker_failure_keeps_fused_order() {
        let engine = HybridSearchEngine::new(
            Arc::new(MockStore::with_docs(nursing_corpus())),
            RagConfig::default(),
        )
        .with_reranker(Arc::new(FailingReranker));

        let result = engine.search(&SearchRequest::new("nursing plan").with_top_k(1)).await;

        assert_eq!(ids(&result), vec!["d1"]);
        assert!(matches!(
            result.metrics.outcome(PipelineStage::Rerank),
            Some(StageOutcome::Degraded { .. })
        ));
    }

    #[tokio::test]
    async fn test_insufficient_results_get_suggestions() {
        let expander = DictionaryExpander::new(
            vec![TermEntry::new("pressure ulcer", ["bedsore", "decubitus"]).with_frequency(3)],
            &ExpansionConfig::default(),
        );
        let corpus = vec![ScoredDocument::new("d9", "", "pressure ulcer observed on heel")];
        let engine =
            HybridSearchEngine::new(Arc::new(MockStore::with_docs(corpus)), RagConfig::default())
                .with_expander(Arc::new(expander));

        let result = engine.search(&SearchRequest::new("bedsore")).await;

        // Expansion lets the canonical term match.
        assert!(result.expanded_query.contains("pressure ulcer"));
        assert_eq!(ids(&result), vec!["d9"]);
        assert!(!result.sufficient);
        assert_eq!(result.suggested_terms.len(), 1);
        assert_eq!(result.suggested_terms[0].canonical, "pressure ulcer");
        assert_eq!(result.suggested_terms[0].alternatives, vec!["bedsore", "decubitus"]);
    }

    #[tokio::test]
    async fn test_expander_failure_uses_original_query() {
        let engine = HybridSearchEngine::new(
            Arc::new(MockStore::with_docs(nursing_corpus())),
            RagConfig::default(),
        )
        .with_expander(Arc::new(FailingExpander));

        let result = engine.search(&SearchRequest::new("  nursing plan ")).await;

        assert_eq!(result.expanded_query, "nursing plan");
        assert_eq!(ids(&result), vec!["d1", "d2"]);
        assert!(matches!(
            result.metrics.outcome(PipelineStage::Preprocess),
            Some(StageOutcome::Degraded { .. })
        ));
        assert!(result.sufficient);
    }

    #[tokio::test]
    async fn test_empty_query_is_best_effort() {
        let engine = HybridSearchEngine::new(
            Arc::new(MockStore::with_docs(nursing_corpus())),
            RagConfig::default(),
        );

        let result = engine.search(&SearchRequest::new("  ?! ")).await;

        assert!(result.documents.is_empty());
        assert!(!result.sufficient);
        match result.metrics.outcome(PipelineStage::Preprocess) {
            Some(StageOutcome::Degraded { reason }) => assert!(reason.contains("Invalid query")),
            other => panic!("unexpected preprocess outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filters_reach_both_passes() {
        let corpus = nursing_corpus();
        let engine = hybrid_engine(
            MockStore::with_docs(corpus.clone()),
            FixedIndex::ordered(corpus),
        );

        let filters = SearchFilters {
            domain: Some("billing".to_string()),
            owner: None,
        };
        let result = engine
            .search(&vector_request("nursing invoice").with_filters(filters))
            .await;

        assert_eq!(ids(&result), vec!["d3"]);
        assert_eq!(result.metrics.candidates.corpus, 1);
    }

    #[tokio::test]
    async fn test_candidate_limit_caps_fusion() {
        let corpus: Vec<ScoredDocument> = (0..20)
            .map(|i| ScoredDocument::new(format!("d{:02}", i), "", "care note"))
            .collect();
        let mut config = RagConfig::default();
        config.search.candidate_limit = 5;
        let engine = HybridSearchEngine::new(Arc::new(MockStore::with_docs(corpus)), config);

        let result = engine.search(&SearchRequest::new("care").with_top_k(50)).await;

        assert_eq!(result.metrics.candidates.keyword, 20);
        assert_eq!(result.metrics.candidates.fused, 5);
        assert_eq!(result.documents.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_searches_share_cache() {
        let cache = Arc::new(CacheService::new(4));
        let engine = Arc::new(
            hybrid_engine(
                MockStore::with_docs(nursing_corpus()),
                FixedIndex::ordered(nursing_corpus()),
            )
            .with_embedder(Arc::new(CountingEmbedder::default()))
            .with_cache(cache.clone()),
        );

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let query = format!("nursing {}", i % 6);
                    engine.search(&SearchRequest::new(query)).await
                })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(!result.metrics.has_failures());
        }
        assert!(cache.len() <= 4);
    }
}
