//! Core domain types for the retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A document flowing through the pipeline.
///
/// Each stage owns exactly one score field and only that stage writes it.
/// `id` is the join key between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    /// Unique identifier within a corpus.
    pub id: String,

    /// Document title.
    #[serde(default)]
    pub title: String,

    /// Searchable body text.
    #[serde(default)]
    pub content: String,

    /// Kind of source record (e.g. "visit_record", "care_plan").
    #[serde(default)]
    pub source_type: String,

    /// Record date as supplied by the store.
    #[serde(default)]
    pub date: Option<String>,

    /// Domain used for filtering (e.g. "nursing").
    #[serde(default)]
    pub domain: Option<String>,

    /// Owner used for filtering (e.g. a client id).
    #[serde(default)]
    pub owner: Option<String>,

    /// Keyword relevance, written by the BM25 scorer.
    #[serde(default)]
    pub bm25_score: Option<f64>,

    /// Vector similarity, written by the vector index.
    #[serde(default)]
    pub vector_score: Option<f64>,

    /// Fused reciprocal-rank score, written by the fusion engine.
    #[serde(default)]
    pub rrf_score: Option<f64>,

    /// Relevance from the re-ranking collaborator.
    #[serde(default)]
    pub rerank_score: Option<f64>,
}

impl ScoredDocument {
    /// Create an unscored document.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            source_type: String::new(),
            date: None,
            domain: None,
            owner: None,
            bm25_score: None,
            vector_score: None,
            rrf_score: None,
            rerank_score: None,
        }
    }

    /// Set the domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the source type.
    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    /// Drop every pipeline score, leaving the stored fields.
    pub fn without_scores(mut self) -> Self {
        self.bm25_score = None;
        self.vector_score = None;
        self.rrf_score = None;
        self.rerank_score = None;
        self
    }
}

/// Caller-supplied restrictions applied by both retrieval passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Only documents in this domain.
    #[serde(default)]
    pub domain: Option<String>,

    /// Only documents belonging to (or mentioning) this owner.
    #[serde(default)]
    pub owner: Option<String>,
}

impl SearchFilters {
    /// Filters that match everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Check whether a document passes the filters.
    ///
    /// The owner filter accepts an exact owner match, or the owner id
    /// appearing in the document id, title or content.
    pub fn matches(&self, doc: &ScoredDocument) -> bool {
        if let Some(domain) = &self.domain {
            if doc.domain.as_deref() != Some(domain.as_str()) {
                return false;
            }
        }

        if let Some(owner) = &self.owner {
            let owned = doc.owner.as_deref() == Some(owner.as_str())
                || doc.id.contains(owner.as_str())
                || doc.title.contains(owner.as_str())
                || doc.content.contains(owner.as_str());
            if !owned {
                return false;
            }
        }

        true
    }

    /// True when no filter is set.
    pub fn is_empty(&self) -> bool {
        self.domain.is_none() && self.owner.is_none()
    }
}

/// One position in a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Document id.
    pub id: String,

    /// 0-based rank.
    pub rank: usize,

    /// Score that produced the ranking (BM25, similarity or rerank score).
    pub score: f64,
}

/// An ordered sequence of document ids with 0-based ranks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    entries: Vec<RankedEntry>,
}

impl RankedList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from `(id, score)` pairs already in rank order.
    pub fn from_scored<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let entries = items
            .into_iter()
            .enumerate()
            .map(|(rank, (id, score))| RankedEntry {
                id: id.into(),
                rank,
                score,
            })
            .collect();
        Self { entries }
    }

    /// Build a list from ids in rank order, with a zero score.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_scored(ids.into_iter().map(|id| (id, 0.0)))
    }

    /// Append an id at the next rank.
    pub fn push(&mut self, id: impl Into<String>, score: f64) {
        let rank = self.entries.len();
        self.entries.push(RankedEntry {
            id: id.into(),
            rank,
            score,
        });
    }

    /// Iterate in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter()
    }

    /// Ids in rank order.
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of the term-expansion collaborator's enrichment call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryExpansion {
    /// Query as received.
    pub original_query: String,

    /// Canonical terms recognised in the query.
    pub extracted_terms: Vec<String>,

    /// Canonical terms plus their synonyms.
    pub expanded_terms: Vec<String>,

    /// Query text used for retrieval.
    pub expanded_query: String,
}

impl QueryExpansion {
    /// An expansion that leaves the query untouched.
    pub fn passthrough(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            extracted_terms: Vec::new(),
            expanded_terms: Vec::new(),
            expanded_query: query.to_string(),
        }
    }
}

/// An alternative-term suggestion offered when results are insufficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSuggestion {
    /// Term as found in the query.
    pub original: String,

    /// Canonical form.
    pub canonical: String,

    /// Alternative spellings or synonyms to try.
    pub alternatives: Vec<String>,

    /// Dictionary category.
    #[serde(default)]
    pub category: String,

    /// Usage frequency used for ordering suggestions.
    #[serde(default)]
    pub frequency: u64,
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Result served from the cache; no other stage ran.
    CacheLookup,
    Preprocess,
    KeywordRetrieval,
    VectorRetrieval,
    Fusion,
    Rerank,
    Validate,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CacheLookup => "cache_lookup",
            Self::Preprocess => "preprocess",
            Self::KeywordRetrieval => "keyword_retrieval",
            Self::VectorRetrieval => "vector_retrieval",
            Self::Fusion => "fusion",
            Self::Rerank => "rerank",
            Self::Validate => "validate",
        };
        f.pad(s)
    }
}

/// How a single stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage completed normally.
    Succeeded,

    /// Stage completed with a fallback.
    Degraded { reason: String },

    /// Stage produced nothing; downstream stages work without it.
    Failed { reason: String },

    /// Stage was not run.
    Skipped,
}

impl StageOutcome {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Timing and outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: PipelineStage,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,

    pub outcome: StageOutcome,
}

/// Candidate counts at each stage boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCounts {
    /// Documents in the filtered corpus snapshot.
    pub corpus: usize,

    /// Documents ranked by the keyword pass.
    pub keyword: usize,

    /// Documents ranked by the vector pass.
    pub vector: usize,

    /// Candidates kept after fusion and capping.
    pub fused: usize,

    /// Documents returned by the re-ranker.
    pub reranked: usize,

    /// Documents in the final result.
    pub returned: usize,
}

/// Observability record for one search invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Per-stage outcomes in execution order.
    pub stages: Vec<StageMetrics>,

    pub candidates: CandidateCounts,

    /// Total wall-clock duration in milliseconds.
    pub total_duration_ms: f64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage outcome.
    pub fn record(&mut self, stage: PipelineStage, duration: Duration, outcome: StageOutcome) {
        self.stages.push(StageMetrics {
            stage,
            duration_ms: duration.as_secs_f64() * 1000.0,
            outcome,
        });
    }

    /// Look up the metrics of a stage.
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageMetrics> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Outcome of a stage, if it was recorded.
    pub fn outcome(&self, stage: PipelineStage) -> Option<&StageOutcome> {
        self.stage(stage).map(|s| &s.outcome)
    }

    /// True if any stage failed.
    pub fn has_failures(&self) -> bool {
        self.stages.iter().any(|s| s.outcome.is_failed())
    }
}

/// Final output of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Query as received.
    pub query: String,

    /// Query used for retrieval after expansion.
    pub expanded_query: String,

    /// Top-k documents in final order.
    pub documents: Vec<ScoredDocument>,

    /// False when fewer documents than the sufficiency threshold were found.
    pub sufficient: bool,

    /// Alternative terms; empty unless results were insufficient.
    pub suggested_terms: Vec<TermSuggestion>,

    /// True when this result was served from the result cache.
    pub cached: bool,

    pub metrics: PipelineMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_list_assigns_ranks() {
        let list = RankedList::from_ids(["a", "b", "c"]);
        let ranks: Vec<usize> = list.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(list.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ranked_list_push() {
        let mut list = RankedList::new();
        list.push("x", 0.9);
        list.push("y", 0.4);
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().nth(1).map(|e| e.rank), Some(1));
    }

    #[test]
    fn test_filters_domain() {
        let doc = ScoredDocument::new("d1", "", "text").with_domain("nursing");
        let nursing = SearchFilters {
            domain: Some("nursing".to_string()),
            owner: None,
        };
        let rehab = SearchFilters {
            domain: Some("rehab".to_string()),
            owner: None,
        };
        assert!(nursing.matches(&doc));
        assert!(!rehab.matches(&doc));
        assert!(SearchFilters::none().matches(&doc));
    }

    #[test]
    fn test_filters_owner_substring() {
        let doc = ScoredDocument::new("rec-C042-7", "Visit", "notes");
        let filters = SearchFilters {
            domain: None,
            owner: Some("C042".to_string()),
        };
        assert!(filters.matches(&doc));

        let other = ScoredDocument::new("rec-9", "Visit", "notes").with_owner("C042");
        assert!(filters.matches(&other));

        let miss = ScoredDocument::new("rec-10", "Visit", "notes");
        assert!(!filters.matches(&miss));
    }

    #[test]
    fn test_metrics_lookup() {
        let mut metrics = PipelineMetrics::new();
        metrics.record(
            PipelineStage::VectorRetrieval,
            Duration::from_millis(3),
            StageOutcome::failed("down"),
        );
        assert!(metrics.has_failures());
        assert!(metrics
            .outcome(PipelineStage::VectorRetrieval)
            .is_some_and(StageOutcome::is_failed));
        assert!(metrics.stage(PipelineStage::Fusion).is_none());
    }

    #[test]
    fn test_without_scores() {
        let mut doc = ScoredDocument::new("d", "t", "c");
        doc.bm25_score = Some(1.0);
        doc.rerank_score = Some(0.5);
        let clean = doc.without_scores();
        assert!(clean.bm25_score.is_none());
        assert!(clean.rerank_score.is_none());
    }
}
