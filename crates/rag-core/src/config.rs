//! Configuration types for the retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Search pipeline configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Term expansion configuration.
    #[serde(default)]
    pub expansion: ExpansionConfig,
}

/// Search pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum number of results.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Candidates kept from the keyword pass.
    #[serde(default = "default_bm25_top_k")]
    pub bm25_top_k: usize,

    /// Candidates requested from the vector pass.
    #[serde(default = "default_dense_top_k")]
    pub dense_top_k: usize,

    /// Fused candidates handed to the re-ranker.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// RRF constant k.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Weight of the keyword list in fusion.
    #[serde(default = "default_weight")]
    pub bm25_weight: f64,

    /// Weight of the vector list in fusion.
    #[serde(default = "default_weight")]
    pub vector_weight: f64,

    /// BM25 term-frequency saturation.
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,

    /// BM25 length normalization.
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,

    /// Results below this count are insufficient.
    #[serde(default = "default_min_results")]
    pub min_results: usize,

    /// Suggestions requested for insufficient results.
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,

    /// Deadline for each collaborator call, in milliseconds.
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,

    /// Store finished results in the cache.
    #[serde(default = "default_true")]
    pub cache_results: bool,

    /// TTL of cached results, in seconds.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_top_k: 100,
            bm25_top_k: 500,
            dense_top_k: 50,
            candidate_limit: 50,
            rrf_k: 60,
            bm25_weight: 0.5,
            vector_weight: 0.5,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            min_results: 2,
            max_suggestions: 5,
            collaborator_timeout_ms: 30_000,
            cache_results: true,
            result_ttl_secs: 300,
        }
    }
}

impl SearchConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Clamp a requested result count into `1..=max_top_k`.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k.max(1))
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live entries.
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// TTL of memoized query embeddings, in seconds.
    #[serde(default = "default_embedding_ttl_secs")]
    pub embedding_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            embedding_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn embedding_ttl(&self) -> Duration {
        Duration::from_secs(self.embedding_ttl_secs)
    }
}

/// Term expansion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Synonyms added per recognised term.
    #[serde(default = "default_max_synonyms")]
    pub max_synonyms: usize,

    /// Alternatives listed per suggestion.
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,

    /// JSON synonym dictionary.
    #[serde(default)]
    pub dictionary_path: Option<PathBuf>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_synonyms: 10,
            max_alternatives: 3,
            dictionary_path: None,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    10
}

fn default_max_top_k() -> usize {
    100
}

fn default_bm25_top_k() -> usize {
    500
}

fn default_dense_top_k() -> usize {
    50
}

fn default_candidate_limit() -> usize {
    50
}

fn default_rrf_k() -> u32 {
    60
}

fn default_weight() -> f64 {
    0.5
}

fn default_bm25_k1() -> f64 {
    1.5
}

fn default_bm25_b() -> f64 {
    0.75
}

fn default_min_results() -> usize {
    2
}

fn default_max_suggestions() -> usize {
    5
}

fn default_collaborator_timeout_ms() -> u64 {
    30_000
}

fn default_result_ttl_secs() -> u64 {
    300
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_embedding_ttl_secs() -> u64 {
    3600
}

fn default_max_synonyms() -> usize {
    10
}

fn default_max_alternatives() -> usize {
    3
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rag-search").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("rag-search.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RagError::config(format!("Failed to render config: {}", e)))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;

        for (name, weight) in [
            ("bm25_weight", search.bm25_weight),
            ("vector_weight", search.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RagError::config(format!(
                    "search.{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        if search.default_top_k == 0 || search.max_top_k == 0 {
            return Err(RagError::config("search top_k values must be at least 1"));
        }

        if search.candidate_limit == 0 {
            return Err(RagError::config("search.candidate_limit must be at least 1"));
        }

        if !(search.bm25_k1.is_finite() && search.bm25_k1 >= 0.0)
            || !(0.0..=1.0).contains(&search.bm25_b)
        {
            return Err(RagError::config(
                "search.bm25_k1 must be >= 0 and search.bm25_b within [0, 1]",
            ));
        }

        if self.cache.max_size == 0 {
            return Err(RagError::config("cache.max_size must be at least 1"));
        }

        Ok(())
    }
}
