//! Reciprocal Rank Fusion (RRF) for combining ranked lists.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use rag_core::{RankedList, SearchConfig};

/// RRF constant (commonly 60).
/// Higher values flatten the difference between top and lower ranks.
pub const RRF_K: f64 = 60.0;

/// Per-list weights applied to reciprocal-rank contributions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub bm25: f64,
    pub vector: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            bm25: 0.5,
            vector: 0.5,
        }
    }
}

/// One document of a fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedEntry {
    pub id: String,

    /// `bm25 weight * bm25_rrf + vector weight * vector_rrf`.
    pub rrf_score: f64,

    /// Unweighted contribution from the keyword list (0 if absent).
    pub bm25_rrf: f64,

    /// Unweighted contribution from the vector list (0 if absent).
    pub vector_rrf: f64,
}

/// Contribution of a 0-based rank.
pub fn rrf_contribution(k: f64, rank: usize) -> f64 {
    1.0 / (k + rank as f64 + 1.0)
}

/// Best (lowest-rank) contribution of each id in a list.
fn contributions(list: &RankedList, k: f64) -> HashMap<&str, f64> {
    let mut scores: HashMap<&str, f64> = HashMap::with_capacity(list.len());
    for entry in list.iter() {
        let rrf = rrf_contribution(k, entry.rank);
        scores
            .entry(entry.id.as_str())
            .and_modify(|s| *s = s.max(rrf))
            .or_insert(rrf);
    }
    scores
}

/// Stateless two-list fusion engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankFusion {
    k: f64,
    weights: FusionWeights,
}

impl Default for RankFusion {
    fn default() -> Self {
        Self::new(RRF_K, FusionWeights::default())
    }
}

impl RankFusion {
    pub fn new(k: f64, weights: FusionWeights) -> Self {
        Self { k, weights }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.rrf_k as f64,
            FusionWeights {
                bm25: config.bm25_weight,
                vector: config.vector_weight,
            },
        )
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// Fuse a keyword ranking and a vector ranking.
    ///
    /// The result holds the union of ids, ordered by descending fused score
    /// and then by id.
    pub fn fuse(&self, bm25: &RankedList, vector: &RankedList) -> Vec<FusedEntry> {
        let bm25_scores = contributions(bm25, self.k);
        let vector_scores = contributions(vector, self.k);

        let mut fused: HashMap<&str, FusedEntry> = HashMap::new();
        for (id, rrf) in &bm25_scores {
            fused.entry(*id).or_insert_with(|| empty_entry(id)).bm25_rrf = *rrf;
        }
        for (id, rrf) in &vector_scores {
            fused.entry(*id).or_insert_with(|| empty_entry(id)).vector_rrf = *rrf;
        }

        let mut fused: Vec<FusedEntry> = fused
            .into_values()
            .map(|mut entry| {
                entry.rrf_score =
                    self.weights.bm25 * entry.bm25_rrf + self.weights.vector * entry.vector_rrf;
                entry
            })
            .collect();

        fused.sort_by(|a, b| {
            b.rrf_score
                .total_cmp(&a.rrf_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        fused
    }
}

fn empty_entry(id: &str) -> FusedEntry {
    FusedEntry {
        id: id.to_string(),
        rrf_score: 0.0,
        bm25_rrf: 0.0,
        vector_rrf: 0.0,
    }
}
