//! Synonym-dictionary term expansion.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rag_core::{ExpansionConfig, QueryExpansion, RagError, Result, TermExpander, TermSuggestion};

/// One dictionary entry: a canonical term and the spellings that map to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    pub canonical: String,

    #[serde(default)]
    pub synonyms: Vec<String>,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub frequency: u64,
}

impl TermEntry {
    pub fn new<I, S>(canonical: impl Into<String>, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            canonical: canonical.into(),
            synonyms: synonyms.into_iter().map(Into::into).collect(),
            category: String::new(),
            frequency: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_frequency(mut self, frequency: u64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Canonical form first, then synonyms.
    fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str()).chain(self.synonyms.iter().map(String::as_str))
    }
}

/// Term expander backed by an in-memory synonym dictionary.
#[derive(Debug, Clone)]
pub struct DictionaryExpander {
    entries: Vec<TermEntry>,
    max_synonyms: usize,
    max_alternatives: usize,
}

impl DictionaryExpander {
    pub fn new(entries: Vec<TermEntry>, config: &ExpansionConfig) -> Self {
        info!("Term dictionary loaded with {} entries", entries.len());
        Self {
            entries,
            max_synonyms: config.max_synonyms,
            max_alternatives: config.max_alternatives,
        }
    }

    /// Load a JSON array of [`TermEntry`] records.
    pub fn load(path: &Path, config: &ExpansionConfig) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<TermEntry> = serde_json::from_str(&content)?;
        if entries.iter().any(|e| e.canonical.trim().is_empty()) {
            return Err(RagError::invalid_argument(format!(
                "term dictionary {} has an entry without a canonical term",
                path.display()
            )));
        }
        Ok(Self::new(entries, config))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, canonical: &str) -> Option<&TermEntry> {
        self.entries.iter().find(|e| e.canonical == canonical)
    }

    /// Canonical terms whose canonical form or any synonym occurs in `text`,
    /// unique and in dictionary order.
    pub fn extract_terms(&self, text: &str) -> Vec<String> {
        let haystack = text.to_lowercase();
        let mut seen = HashSet::new();

        let terms: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .spellings()
                    .any(|s| !s.is_empty() && haystack.contains(&s.to_lowercase()))
            })
            .filter(|entry| seen.insert(entry.canonical.as_str()))
            .map(|entry| entry.canonical.clone())
            .collect();

        debug!("Extracted {} dictionary terms", terms.len());
        terms
    }

    /// Each canonical term followed by up to `max_synonyms` of its synonyms.
    pub fn expand_synonyms(&self, terms: &[String]) -> Vec<String> {
        let mut expanded = Vec::new();
        for term in terms {
            expanded.push(term.clone());
            if let Some(entry) = self.entry(term) {
                expanded.extend(entry.synonyms.iter().take(self.max_synonyms).cloned());
            }
        }
        expanded
    }

    /// Enrich a query with recognised terms and their synonyms.
    pub fn enrich(&self, query: &str) -> QueryExpansion {
        let extracted_terms = self.extract_terms(query);
        let expanded_terms = self.expand_synonyms(&extracted_terms);

        let expanded_query = if expanded_terms.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", query, expanded_terms.join(" "))
        };

        QueryExpansion {
            original_query: query.to_string(),
            extracted_terms,
            expanded_terms,
            expanded_query,
        }
    }

    /// Alternatives for the terms in `query`, most frequent first.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<TermSuggestion> {
        let mut suggestions: Vec<TermSuggestion> = self
            .extract_terms(query)
            .into_iter()
            .filter_map(|term| {
                let entry = self.entry(&term)?;
                Some(TermSuggestion {
                    original: term.clone(),
                    canonical: term,
                    alternatives: entry
                        .synonyms
                        .iter()
                        .take(self.max_alternatives)
                        .cloned()
                        .collect(),
                    category: entry.category.clone(),
                    frequency: entry.frequency,
                })
            })
            .collect();

        // Stable: equal frequencies keep dictionary order.
        suggestions.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        suggestions.truncate(limit);

        info!("Generated {} alternative term suggestions", suggestions.len());
        suggestions
    }
}

#[async_trait]
impl TermExpander for DictionaryExpander {
    async fn expand_terms(&self, query: &str) -> Result<QueryExpansion> {
        Ok(self.enrich(query))
    }

    async fn suggest_terms(&self, query: &str, limit: usize) -> Result<Vec<TermSuggestion>> {
        Ok(self.suggest(query, limit))
    }
}
