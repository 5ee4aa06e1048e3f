//! Memoization on top of [`CacheService`].

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use rag_core::{RagError, Result};

use crate::fingerprint::fingerprint;
use crate::service::CacheService;

/// Derives a cache key from call arguments.
pub trait KeyFn<A: ?Sized> {
    fn key_for(&self, args: &A) -> Result<String>;
}

/// Default key function: [`fingerprint`] of the arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprint;

impl<A: Serialize + ?Sized> KeyFn<A> for Fingerprint {
    fn key_for(&self, args: &A) -> Result<String> {
        fingerprint(args)
    }
}

impl<A: ?Sized, F> KeyFn<A> for F
where
    F: Fn(&A) -> String,
{
    fn key_for(&self, args: &A) -> Result<String> {
        Ok(self(args))
    }
}

/// A memoizing view of a cache namespace.
///
/// The sync and async entry points share the same lookup and store path;
/// the cache lock is never held while the wrapped computation runs.
pub struct Memoized<'a, K = Fingerprint> {
    cache: &'a CacheService,
    namespace: String,
    ttl: Duration,
    key_fn: K,
}

impl<'a> Memoized<'a, Fingerprint> {
    pub(crate) fn new(cache: &'a CacheService, namespace: String, ttl: Duration) -> Self {
        Self {
            cache,
            namespace,
            ttl,
            key_fn: Fingerprint,
        }
    }

    /// Replace the fingerprint with a custom key function.
    pub fn with_key_fn<K>(self, key_fn: K) -> Memoized<'a, K> {
        Memoized {
            cache: self.cache,
            namespace: self.namespace,
            ttl: self.ttl,
            key_fn,
        }
    }
}

impl<'a, K> Memoized<'a, K> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Return the cached value for `args`, or compute and cache it.
    pub fn call<A, T, F>(&self, args: &A, compute: F) -> Result<T>
    where
        A: ?Sized,
        K: KeyFn<A>,
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.try_call(args, || Ok::<T, RagError>(compute()))
    }

    /// Like [`Memoized::call`] for fallible computations. Errors are not cached.
    pub fn try_call<A, T, E, F>(&self, args: &A, compute: F) -> std::result::Result<T, E>
    where
        A: ?Sized,
        K: KeyFn<A>,
        T: Clone + Send + Sync + 'static,
        E: From<RagError>,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let key = self.key_fn.key_for(args)?;
        if let Some(hit) = self.cache.get::<T>(&self.namespace, &key) {
            debug!("Returning memoized value from '{}'", self.namespace);
            return Ok(hit);
        }

        let value = compute()?;
        self.cache.set(&self.namespace, &key, value.clone(), self.ttl);
        Ok(value)
    }

    /// Async counterpart of [`Memoized::try_call`].
    pub async fn call_async<A, T, E, F, Fut>(
        &self,
        args: &A,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        A: ?Sized,
        K: KeyFn<A>,
        T: Clone + Send + Sync + 'static,
        E: From<RagError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = self.key_fn.key_for(args)?;
        if let Some(hit) = self.cache.get::<T>(&self.namespace, &key) {
            debug!("Returning memoized value from '{}'", self.namespace);
            return Ok(hit);
        }

        let value = compute().await?;
        self.cache.set(&self.namespace, &key, value.clone(), self.ttl);
        Ok(value)
    }
}
