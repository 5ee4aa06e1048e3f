//! Sufficiency check and fallback term suggestions.

use std::time::Duration;

use tracing::{debug, info, warn};

use rag_core::{ScoredDocument, SearchConfig, StageOutcome, TermExpander, TermSuggestion};

use crate::deadline::bounded;

/// Outcome of validating a final document list.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub sufficient: bool,
    pub suggestions: Vec<TermSuggestion>,
    pub outcome: StageOutcome,
}

/// Decides whether results are sufficient and, if not, asks the term
/// expander for alternatives.
#[derive(Debug, Clone, Copy)]
pub struct ResultValidator {
    min_results: usize,
    max_suggestions: usize,
    timeout: Duration,
}

impl ResultValidator {
    pub fn new(min_results: usize, max_suggestions: usize, timeout: Duration) -> Self {
        Self {
            min_results,
            max_suggestions,
            timeout,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.min_results,
            config.max_suggestions,
            config.collaborator_timeout(),
        )
    }

    pub fn min_results(&self) -> usize {
        self.min_results
    }

    pub fn is_sufficient(&self, documents: &[ScoredDocument]) -> bool {
        documents.len() >= self.min_results
    }

    /// Validate `documents` found for `query`.
    ///
    /// Suggestions are best-effort: a failing or missing expander yields an
    /// empty list and never an error.
    pub async fn validate(
        &self,
        query: &str,
        documents: &[ScoredDocument],
        expander: Option<&dyn TermExpander>,
    ) -> Validation {
        if self.is_sufficient(documents) {
            debug!("{} results meet the threshold of {}", documents.len(), self.min_results);
            return Validation {
                sufficient: true,
                suggestions: Vec::new(),
                outcome: StageOutcome::Succeeded,
            };
        }

        info!(
            "Insufficient results ({} < {}), requesting alternative terms",
            documents.len(),
            self.min_results
        );

        let Some(expander) = expander else {
            return Validation {
                sufficient: false,
                suggestions: Vec::new(),
                outcome: StageOutcome::Succeeded,
            };
        };

        let suggested = bounded(
            "term-expander",
            self.timeout,
            expander.suggest_terms(query, self.max_suggestions),
        )
        .await;

        match suggested {
            Ok(mut suggestions) => {
                suggestions.truncate(self.max_suggestions);
                Validation {
                    sufficient: false,
                    suggestions,
                    outcome: StageOutcome::Succeeded,
                }
            }
            Err(e) => {
                warn!("Term suggestions unavailable: {}", e);
                Validation {
                    sufficient: false,
                    suggestions: Vec::new(),
                    outcome: StageOutcome::degraded(e.to_string()),
                }
            }
        }
    }
}
