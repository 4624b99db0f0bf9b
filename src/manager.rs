//! Cache Manager
//!
//! Single entry point for callers: read through the cache, load on miss
//! with deduplication and optional retry, and store what was loaded.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStats, CacheStore, SetOptions};
use crate::config::Config;
use crate::error::{CacheError, Result, Retryable};
use crate::network::{execute_with_retry, ConcurrencyLimiter, RequestDeduplicator, RetryPolicy};

// == Load Options ==
/// Per-call options for [`CacheManager::get_or_load`].
pub struct LoadOptions<E> {
    /// TTL for the loaded value; None uses the store default
    pub ttl: Option<Duration>,
    /// Retry policy for the loader; None falls back to the manager default
    pub retry: Option<RetryPolicy<E>>,
}

impl<E> LoadOptions<E> {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            retry: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }
}

impl<E> Default for LoadOptions<E> {
    fn default() -> Self {
        Self {
            ttl: None,
            retry: None,
        }
    }
}

impl<E> Clone for LoadOptions<E> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            retry: self.retry.clone(),
        }
    }
}

impl<E> fmt::Debug for LoadOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("ttl", &self.ttl)
            .field("retry", &self.retry)
            .finish()
    }
}

// == Cache Manager ==
/// Read-through cache over a [`CacheStore`].
///
/// `E` is the loader error type. It must absorb [`CacheError`] (for
/// serialization and key validation failures) and be `Clone` so one failed
/// load can be handed to every joined caller.
pub struct CacheManager<E = CacheError> {
    store: Arc<CacheStore>,
    in_flight: RequestDeduplicator<Value, E>,
    default_retry: Option<RetryPolicy<E>>,
    limiter: ConcurrencyLimiter,
}

impl<E> CacheManager<E>
where
    E: From<CacheError> + Retryable + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Manager whose default retry policy and batch width come from `config`.
    pub fn from_config(store: Arc<CacheStore>, config: &Config) -> Self {
        Self::new(store)
            .with_default_retry(config.retry_policy())
            .with_concurrency(config.concurrency)
    }
}

impl<E> CacheManager<E>
where
    E: From<CacheError> + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Manager with no default retry and the default batch width.
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            in_flight: RequestDeduplicator::new(),
            default_retry: None,
            limiter: ConcurrencyLimiter::default(),
        }
    }

    /// Retry policy used when `LoadOptions::retry` is None.
    pub fn with_default_retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.default_retry = Some(policy);
        self
    }

    /// Batch width used by `load_many` when the call does not give one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.limiter = ConcurrencyLimiter::new(concurrency);
        self
    }

    pub fn default_retry(&self) -> Option<&RetryPolicy<E>> {
        self.default_retry.as_ref()
    }

    pub fn concurrency(&self) -> usize {
        self.limiter.concurrency()
    }

    // == Get Or Load ==
    /// Returns the cached value for `key`, or loads, stores and returns it.
    ///
    /// Concurrent misses on the same key run `loader` once. A failed load is
    /// not cached; its error reaches every caller that joined it.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        opts: LoadOptions<E>,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if let Some(value) = self.store.get(key).await {
            debug!(key = %key, "Cache hit");
            return decode(key, value);
        }

        debug!(key = %key, "Cache miss, loading");
        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let mut loader = loader;
        let retry = opts.retry.or_else(|| self.default_retry.clone());
        let ttl = opts.ttl;

        let value = self
            .in_flight
            .acquire(key, move || async move {
                let loaded = match &retry {
                    Some(policy) => execute_with_retry(policy, &mut loader).await?,
                    None => loader().await?,
                };
                let value = serde_json::to_value(&loaded)
                    .map_err(|err| E::from(CacheError::from(err)))?;
                store
                    .set(
                        &owned_key,
                        value.clone(),
                        SetOptions {
                            ttl,
                            max_size: None,
                        },
                    )
                    .map_err(E::from)?;
                Ok::<Value, E>(value)
            })
            .await?;

        decode(key, value)
    }

    // == Batch Helpers ==
    /// Looks up every key in parallel. `result[i]` belongs to `keys[i]`.
    ///
    /// Values that do not decode as `T` are reported as misses.
    pub async fn get_multiple<T, K>(&self, keys: &[K]) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let values = join_all(keys.iter().map(|key| self.store.get(key.as_ref()))).await;

        values
            .into_iter()
            .zip(keys)
            .map(|(value, key)| {
                value.and_then(|value| decode::<T, CacheError>(key.as_ref(), value).ok())
            })
            .collect()
    }

    /// Stores every entry independently. One failing entry does not undo
    /// the others.
    pub fn set_multiple<T: Serialize>(
        &self,
        entries: Vec<(String, T)>,
        opts: SetOptions,
    ) -> Vec<Result<()>> {
        entries
            .into_iter()
            .map(|(key, value)| {
                let value = serde_json::to_value(&value)?;
                self.store.set(&key, value, opts)
            })
            .collect()
    }

    /// Runs `get_or_load` for each key, at most `concurrency` at a time
    /// (the manager's width when None). `result[i]` belongs to `keys[i]`.
    pub async fn load_many<T, F, Fut>(
        &self,
        keys: Vec<String>,
        loader: F,
        opts: LoadOptions<E>,
        concurrency: Option<usize>,
    ) -> Vec<std::result::Result<T, E>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let tasks: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let loader = loader.clone();
                let opts = opts.clone();
                move || async move {
                    let loader_key = key.clone();
                    self.get_or_load(&key, move || loader(loader_key.clone()), opts)
                        .await
                }
            })
            .collect();

        let limiter = concurrency.map_or(self.limiter, ConcurrencyLimiter::new);
        limiter.run(tasks).await
    }

    // == Wrap With Cache ==
    /// Turns `loader` into a function that reads through this cache under
    /// `key` every time it is called.
    pub fn wrap_with_cache<T, F, Fut>(
        self: &Arc<Self>,
        key: impl Into<String>,
        loader: F,
        opts: LoadOptions<E>,
    ) -> impl Fn() -> BoxFuture<'static, std::result::Result<T, E>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnMut() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let key = key.into();

        move || {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            let loader = loader.clone();
            let opts = opts.clone();
            async move { manager.get_or_load(&key, loader, opts).await }.boxed()
        }
    }

    // == Passthroughs ==
    pub async fn invalidate(&self, key: &str) {
        self.store.delete(key).await;
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Keys with a load currently pending.
    pub fn in_flight(&self) -> usize {
        self.in_flight.in_flight()
    }
}

impl<E> fmt::Debug for CacheManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("store", &self.store)
            .field("default_retry", &self.default_retry)
            .field("concurrency", &self.limiter.concurrency())
            .finish_non_exhaustive()
    }
}

fn decode<T, E>(key: &str, value: Value) -> std::result::Result<T, E>
where
    T: DeserializeOwned,
    E: From<CacheError>,
{
    serde_json::from_value(value).map_err(|err| {
        warn!(key = %key, error = %err, "Cached value has unexpected shape");
        E::from(CacheError::from(err))
    })
}
