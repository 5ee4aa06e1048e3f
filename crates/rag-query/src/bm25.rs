//! BM25 keyword scoring over a corpus snapshot.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use ordered_float::OrderedFloat;

use rag_core::{tokenize, RankedList, ScoredDocument, SearchConfig};

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,

    /// Length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Term statistics of a tokenized corpus.
struct CorpusIndex {
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<usize>,
    doc_freqs: HashMap<String, usize>,
    avgdl: f64,
}

impl CorpusIndex {
    fn build(corpus: &[ScoredDocument]) -> Self {
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lengths = Vec::with_capacity(corpus.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let tokens = tokenize(&doc.content);
            doc_lengths.push(tokens.len());

            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_default() += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_default() += 1;
            }
            term_freqs.push(freqs);
        }

        let total: usize = doc_lengths.iter().sum();
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total as f64 / corpus.len() as f64
        };

        Self {
            term_freqs,
            doc_lengths,
            doc_freqs,
            avgdl,
        }
    }

    fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    /// IDF of each distinct query term present in the corpus.
    fn query_idf(&self, query: &str) -> Vec<(String, f64)> {
        let n = self.len() as f64;
        let mut seen = HashSet::new();

        tokenize(query)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .filter_map(|term| {
                let df = *self.doc_freqs.get(&term)? as f64;
                // IDF: ln((N - df + 0.5) / (df + 0.5) + 1)
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                Some((term, idf))
            })
            .collect()
    }
}

/// Scores documents against a query with Okapi BM25.
///
/// The scorer holds only its parameters; every call re-derives corpus
/// statistics from the snapshot it is given.
#[derive(Debug, Clone, Default)]
pub struct Bm25Scorer {
    params: Bm25Params,
}

impl Bm25Scorer {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(Bm25Params {
            k1: config.bm25_k1,
            b: config.bm25_b,
        })
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    fn score_doc(&self, index: &CorpusIndex, doc: usize, query: &[(String, f64)]) -> f64 {
        let Bm25Params { k1, b } = self.params;
        let dl = index.doc_lengths[doc] as f64;
        let freqs = &index.term_freqs[doc];

        query
            .iter()
            .filter_map(|(term, idf)| {
                let tf = *freqs.get(term)? as f64;
                // A matching term implies a non-empty corpus, so avgdl > 0.
                let norm = tf + k1 * (1.0 - b + b * dl / index.avgdl);
                Some(idf * (tf * (k1 + 1.0)) / norm)
            })
            .sum()
    }

    /// Score every document, in corpus order. Non-matching documents score 0.
    pub fn score_corpus(&self, query: &str, corpus: &[ScoredDocument]) -> Vec<f64> {
        let index = CorpusIndex::build(corpus);
        let query = index.query_idf(query);
        (0..index.len())
            .map(|doc| self.score_doc(&index, doc, &query))
            .collect()
    }

    /// Rank the `top_k` best matching documents by descending score.
    ///
    /// Documents with a zero score are left out. Equal scores keep corpus
    /// order.
    pub fn rank(&self, query: &str, corpus: &[ScoredDocument], top_k: usize) -> RankedList {
        if top_k == 0 || corpus.is_empty() {
            return RankedList::new();
        }

        let index = CorpusIndex::build(corpus);
        let query = index.query_idf(query);
        if query.is_empty() {
            return RankedList::new();
        }

        // Min-heap of the current best k; the root is the weakest kept entry
        // (lowest score, then latest corpus position).
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, Reverse<usize>)>> =
            BinaryHeap::with_capacity(top_k + 1);

        for doc in 0..index.len() {
            let score = self.score_doc(&index, doc, &query);
            if score <= 0.0 {
                continue;
            }
            heap.push(Reverse((OrderedFloat(score), Reverse(doc))));
            if heap.len() > top_k {
                heap.pop();
            }
        }

        let mut best: Vec<(f64, usize)> = heap
            .into_iter()
            .map(|Reverse((score, Reverse(doc)))| (score.0, doc))
            .collect();
        best.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        RankedList::from_scored(
            best.into_iter()
                .map(|(score, doc)| (corpus[doc].id.clone(), score)),
        )
    }
}
