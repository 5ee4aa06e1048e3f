//! In-memory document store with brute-force vector search.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rag_core::{
    DocumentStore, Embedder, RagError, Result, ScoredDocument, SearchFilters, VectorIndex,
};

use crate::cosine::cosine_similarity;

/// A corpus file record: a document plus an optional precomputed embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(flatten)]
    pub document: ScoredDocument,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

struct StoredDocument {
    document: ScoredDocument,
    embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct StoreState {
    /// Documents in insertion order.
    docs: Vec<StoredDocument>,

    /// Position of each id in `docs`.
    positions: HashMap<String, usize>,

    /// Dimension shared by every stored embedding.
    dimension: Option<usize>,
}

/// Document store and vector index over an in-memory corpus.
///
/// Keyword consumers receive the filtered corpus in insertion order; vector
/// search scores every embedded document by cosine similarity.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of [`CorpusRecord`]s.
    ///
    /// Records without an embedding are embedded with `embedder` when one is
    /// given (title and content joined); otherwise they are keyword-only.
    pub async fn load_json(
        path: impl AsRef<Path>,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading corpus from {:?}", path);

        let content = std::fs::read_to_string(path)?;
        let mut records: Vec<CorpusRecord> = serde_json::from_str(&content)?;

        if let Some(embedder) = embedder {
            let missing: Vec<usize> = records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.embedding.is_none())
                .map(|(i, _)| i)
                .collect();

            if !missing.is_empty() {
                let texts: Vec<String> = missing
                    .iter()
                    .map(|&i| embedding_text(&records[i].document))
                    .collect();
                let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let embeddings = embedder.embed_documents(&text_refs).await?;

                if embeddings.len() != missing.len() {
                    return Err(RagError::internal(format!(
                        "embedder returned {} vectors for {} texts",
                        embeddings.len(),
                        missing.len()
                    )));
                }
                for (i, embedding) in missing.into_iter().zip(embeddings) {
                    records[i].embedding = Some(embedding);
                }
            }
        }

        let store = Self::new();
        for record in records {
            store.insert(record.document, record.embedding)?;
        }

        info!("Loaded {} documents", store.len());
        Ok(store)
    }

    fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&StoreState) -> Result<R>,
    {
        let state = self.state.read().map_err(|e| RagError::internal(e.to_string()))?;
        f(&state)
    }

    fn write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut StoreState) -> Result<R>,
    {
        let mut state = self.state.write().map_err(|e| RagError::internal(e.to_string()))?;
        f(&mut state)
    }

    /// Insert a document, replacing any document with the same id.
    ///
    /// Stored scores are cleared. All embeddings must share one dimension.
    pub fn insert(&self, document: ScoredDocument, embedding: Option<Vec<f32>>) -> Result<()> {
        if document.id.is_empty() {
            return Err(RagError::invalid_argument("document id must not be empty"));
        }

        self.write(|state| {
            if let Some(embedding) = &embedding {
                match state.dimension {
                    Some(dim) if dim != embedding.len() => {
                        return Err(RagError::invalid_argument(format!(
                            "embedding for {} has dimension {}, store uses {}",
                            document.id,
                            embedding.len(),
                            dim
                        )));
                    }
                    Some(_) => {}
                    None => state.dimension = Some(embedding.len()),
                }
            }

            let stored = StoredDocument {
                document: document.without_scores(),
                embedding,
            };

            match state.positions.get(&stored.document.id) {
                Some(&pos) => {
                    debug!("Replaced document: {}", stored.document.id);
                    state.docs[pos] = stored;
                }
                None => {
                    debug!("Inserted document: {}", stored.document.id);
                    state
                        .positions
                        .insert(stored.document.id.clone(), state.docs.len());
                    state.docs.push(stored);
                }
            }
            Ok(())
        })
    }

    /// Get a document by id.
    pub fn get(&self, id: &str) -> Result<ScoredDocument> {
        self.read(|state| {
            state
                .positions
                .get(id)
                .map(|&pos| state.docs[pos].document.clone())
                .ok_or_else(|| RagError::DocumentNotFound { id: id.to_string() })
        })
    }

    /// Remove a document by id.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.write(|state| {
            let pos = state
                .positions
                .remove(id)
                .ok_or_else(|| RagError::DocumentNotFound { id: id.to_string() })?;
            state.docs.remove(pos);
            for p in state.positions.values_mut() {
                if *p > pos {
                    *p -= 1;
                }
            }
            if state.docs.iter().all(|d| d.embedding.is_none()) {
                state.dimension = None;
            }
            debug!("Deleted document: {}", id);
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.read(|state| Ok(state.docs.len())).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimension, once any embedding is stored.
    pub fn dimension(&self) -> Option<usize> {
        self.read(|state| Ok(state.dimension)).unwrap_or_default()
    }
}

fn embedding_text(doc: &ScoredDocument) -> String {
    if doc.title.is_empty() {
        doc.content.clone()
    } else {
        format!("{}\n{}", doc.title, doc.content)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_corpus(&self, filters: &SearchFilters) -> Result<Vec<ScoredDocument>> {
        self.read(|state| {
            Ok(state
                .docs
                .iter()
                .filter(|d| filters.matches(&d.document))
                .map(|d| d.document.clone())
                .collect())
        })
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn vector_search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>> {
        self.read(|state| {
            if let Some(dim) = state.dimension {
                if dim != query_vector.len() {
                    return Err(RagError::invalid_argument(format!(
                        "query vector has dimension {}, store uses {}",
                        query_vector.len(),
                        dim
                    )));
                }
            }

            let mut scored = Vec::new();
            for stored in &state.docs {
                let Some(embedding) = &stored.embedding else {
                    continue;
                };
                if !filters.matches(&stored.document) {
                    continue;
                }
                let similarity = cosine_similarity(query_vector, embedding)?;
                scored.push((similarity, &stored.document));
            }

            // Stable: equal similarity keeps insertion order.
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.truncate(limit);

            Ok(scored
                .into_iter()
                .map(|(similarity, doc)| {
                    let mut doc = doc.clone();
                    doc.vector_score = Some(similarity);
                    doc
                })
                .collect())
        })
    }
}
