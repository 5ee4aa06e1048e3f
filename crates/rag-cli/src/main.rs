//! RAG CLI - Command-line interface for hybrid search over a local corpus.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use rag_cache::CacheService;
use rag_core::{Embedder, RagConfig, SearchFilters, SearchResult, StageOutcome};
use rag_embed::HashEmbedder;
use rag_query::{DictionaryExpander, HybridSearchEngine, SearchRequest};
use rag_store::MemoryStore;

/// RAG - Hybrid keyword and vector search
#[derive(Parser)]
#[command(name = "rag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: user config dir, then ./rag-search.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a JSON corpus
    Search {
        /// Search query
        query: String,

        /// JSON array of documents to search
        #[arg(long)]
        corpus: PathBuf,

        /// JSON synonym dictionary for query expansion
        #[arg(long)]
        dictionary: Option<PathBuf>,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Only documents in this domain
        #[arg(long)]
        domain: Option<String>,

        /// Only documents belonging to this owner
        #[arg(long)]
        owner: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>) -> rag_core::Result<RagConfig> {
    match path {
        Some(path) => RagConfig::load(path),
        None => RagConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Search {
            query,
            corpus,
            dictionary,
            top_k,
            domain,
            owner,
            json,
        } => {
            let filters = SearchFilters { domain, owner };
            let mut request = SearchRequest::new(query).with_filters(filters);
            request.top_k = top_k;

            let result = search(config, &corpus, dictionary, &request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

async fn search(
    config: RagConfig,
    corpus: &Path,
    dictionary: Option<PathBuf>,
    request: &SearchRequest,
) -> Result<SearchResult, Box<dyn std::error::Error>> {
    let embedder = Arc::new(HashEmbedder::new());
    let store = Arc::new(MemoryStore::load_json(corpus, Some(&*embedder as &dyn Embedder)).await?);
    let cache = Arc::new(CacheService::from_config(&config.cache));

    let dictionary = dictionary.or_else(|| config.expansion.dictionary_path.clone());
    let expander = match dictionary {
        Some(path) => Some(DictionaryExpander::load(&path, &config.expansion)?),
        None => None,
    };

    let mut engine = HybridSearchEngine::new(store.clone(), config)
        .with_vector_index(store)
        .with_embedder(embedder)
        .with_cache(cache.clone());
    if let Some(expander) = expander {
        engine = engine.with_expander(Arc::new(expander));
    }

    let result = engine.search(request).await;
    debug!("Cache metrics: {:?}", cache.metrics());

    Ok(result)
}

fn print_result(result: &SearchResult) {
    if result.expanded_query != result.query {
        println!("Expanded query: {}\n", result.expanded_query);
    }

    if result.documents.is_empty() {
        println!("No results found.");
    }

    for (i, doc) in result.documents.iter().enumerate() {
        let score = doc.rerank_score.or(doc.rrf_score).unwrap_or_default();
        let title = if doc.title.is_empty() {
            doc.id.as_str()
        } else {
            doc.title.as_str()
        };
        println!("{}. {} [{}] (score: {:.4})", i + 1, title, doc.id, score);
        println!("   {}", snippet(&doc.content, 160));
    }

    if !result.sufficient && !result.suggested_terms.is_empty() {
        println!("\nFew results. Try:");
        for suggestion in &result.suggested_terms {
            if suggestion.alternatives.is_empty() {
                println!("  - {}", suggestion.canonical);
            } else {
                println!(
                    "  - {} ({})",
                    suggestion.canonical,
                    suggestion.alternatives.join(", ")
                );
            }
        }
    }

    println!();
    for stage in &result.metrics.stages {
        let status = match &stage.outcome {
            StageOutcome::Succeeded => "ok".to_string(),
            StageOutcome::Skipped => "skipped".to_string(),
            StageOutcome::Degraded { reason } => format!("degraded: {}", reason),
            StageOutcome::Failed { reason } => format!("failed: {}", reason),
        };
        println!("{:<18} {:>8.2}ms  {}", stage.stage, stage.duration_ms, status);
    }
    println!("{:<18} {:>8.2}ms", "total", result.metrics.total_duration_ms);
}

fn snippet(content: &str, max_chars: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
