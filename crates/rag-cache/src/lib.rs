//! rag-cache - Namespaced TTL + LRU cache
//!
//! This crate provides the shared cache used to memoize expensive keyed
//! computations such as query embeddings and finished search results.
//!
//! # Features
//!
//! - Namespaced entries with independent TTLs
//! - Strict LRU eviction bounded by `max_size`
//! - Hit/miss/eviction metrics
//! - Memoization of sync and async computations keyed by stable fingerprints
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use rag_cache::CacheService;
//!
//! let cache = CacheService::new(100);
//! let memo = cache.memoize("squares", Duration::from_secs(60));
//! let value = memo.call(&12u64, || 12 * 12).unwrap();
//! assert_eq!(value, 144);
//! ```

mod fingerprint;
mod memoize;
mod service;

pub use fingerprint::fingerprint;
pub use memoize::{Fingerprint, KeyFn, Memoized};
pub use service::{CacheEntryInfo, CacheKey, CacheMetrics, CacheService};
