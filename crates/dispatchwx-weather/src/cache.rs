//! Weather cache manager: get-or-fetch with stale-while-revalidate and
//! single-flight de-duplication.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, ProviderError, StoreError};
use crate::limiter::{ConcurrencyLimiter, DEFAULT_MAX_CONCURRENT_FETCHES};
use crate::record::{CacheRecord, Fetched};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{CacheStore, StoredRecord};
use crate::types::CacheKey;

type FetchResult = Result<StoredRecord, CacheError>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;

#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    pub max_concurrent_fetches: usize,
    pub retry: RetryConfig,
    /// Serve expired records while refreshing in the background
    pub serve_stale: bool,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            retry: RetryConfig::default(),
            serve_stale: true,
        }
    }
}

impl From<&dispatchwx_core::CacheConfig> for CacheManagerConfig {
    fn from(config: &dispatchwx_core::CacheConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            retry: RetryConfig::from_cache_config(config),
            serve_stale: config.serve_stale,
        }
    }
}

/// Per-call overrides for `get_or_fetch_with`.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub serve_stale: bool,
}

/// Orchestrates store reads, provider fetches and background refreshes.
///
/// Cloning is cheap and clones share the same in-flight map.
#[derive(Clone)]
pub struct WeatherCacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    limiter: ConcurrencyLimiter,
    retry: RetryConfig,
    serve_stale: bool,
    /// One entry per composite key with a fetch in progress.
    in_flight: Mutex<HashMap<String, InFlight>>,
}

/// Clears the in-flight entry when the fetch task ends, panics included.
struct InFlightGuard {
    inner: Arc<Inner>,
    composite: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.composite);
    }
}

impl WeatherCacheManager {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheManagerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CacheStore>,
        config: CacheManagerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                limiter: ConcurrencyLimiter::new(config.max_concurrent_fetches),
                retry: config.retry,
                serve_stale: config.serve_stale,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Number of keys with a fetch currently in progress.
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Return the cached record for `key`, fetching it if needed.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
    ) -> Result<CacheRecord<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fetched<T>, ProviderError>> + Send + 'static,
    {
        let options = FetchOptions {
            serve_stale: self.inner.serve_stale,
        };
        self.get_or_fetch_with(key, fetcher, options).await
    }

    pub async fn get_or_fetch_with<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: FetchOptions,
    ) -> Result<CacheRecord<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fetched<T>, ProviderError>> + Send + 'static,
    {
        let now = self.now();
        let (existing, read_error) = match self.inner.store.read(key) {
            Ok(record) => (record, None),
            Err(e) => {
                tracing::warn!("Cache read for {} failed, fetching: {}", key, e);
                (None, Some(e))
            }
        };

        if let Some(record) = existing {
            if record.is_fresh(now) {
                match record.decode::<T>() {
                    Ok(typed) => {
                        tracing::debug!("Cache hit for {}", key);
                        return Ok(typed);
                    }
                    Err(e) => tracing::warn!("Discarding undecodable record: {}", e),
                }
            } else if options.serve_stale {
                match record.decode::<T>() {
                    Ok(typed) => {
                        tracing::debug!(
                            "Serving stale {} (stale_at {}), refreshing in background",
                            key,
                            record.stale_at
                        );
                        self.spawn_refresh(key.clone(), fetcher);
                        return Ok(typed);
                    }
                    Err(e) => tracing::warn!("Discarding undecodable record: {}", e),
                }
            }
        }

        tracing::debug!("Cache miss for {}", key);
        match (self.fetch_shared(key, fetcher).await, read_error) {
            (Ok(stored), _) => stored.decode(),
            // Without a fetched record the unreadable store is the failure.
            (Err(fetch_error), Some(read_error)) => {
                tracing::warn!("Fetch for {} also failed: {}", key, fetch_error);
                Err(CacheError::Store(read_error))
            }
            (Err(fetch_error), None) => Err(fetch_error),
        }
    }

    /// Force the record's stale deadline to now so the next read refreshes it.
    pub fn mark_stale(&self, key: &CacheKey) -> Result<(), StoreError> {
        let now = self.now();
        tracing::info!("Marking {} stale", key);
        self.inner.store.mark_stale(key, now)
    }

    /// Store an already fetched payload as a fresh record.
    ///
    /// Persisting is best-effort, like every cache write.
    pub fn put<T: Serialize>(
        &self,
        key: &CacheKey,
        fetched: Fetched<T>,
    ) -> Result<StoredRecord, CacheError> {
        let record = fetched.into_record(key.clone(), self.now())?;
        self.persist(&record);
        Ok(record)
    }

    /// Run a provider call under the fetch limiter and retry policy, bypassing
    /// the cache.
    pub async fn fetch_direct<T, F, Fut>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.inner
            .limiter
            .run(with_retry(&self.inner.retry, operation))
            .await
            .map_err(|e| ProviderError::Network(format!("fetch limiter: {}", e)))?
    }

    /// Wait for every fetch in progress, including background refreshes.
    pub async fn drain(&self) {
        let pending: Vec<InFlight> = self.inner.in_flight.lock().values().cloned().collect();
        for flight in pending {
            let _ = flight.await;
        }
    }

    fn spawn_refresh<T, F, Fut>(&self, key: CacheKey, fetcher: F)
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fetched<T>, ProviderError>> + Send + 'static,
    {
        let flight = self.fetch_shared(&key, fetcher);
        tokio::spawn(async move {
            match flight.await {
                Ok(_) => tracing::debug!("Background refresh of {} completed", key),
                Err(e) => tracing::warn!("Background refresh of {} failed: {}", key, e),
            }
        });
    }

    /// Join the fetch in progress for `key`, or start one.
    ///
    /// The entry is inserted under the lock before the work can observe the
    /// map, and the work removes it once it settles.
    fn fetch_shared<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> InFlight
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fetched<T>, ProviderError>> + Send + 'static,
    {
        let composite = key.composite();
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.get(&composite) {
            tracing::debug!("Joining in-flight fetch for {}", key);
            return existing.clone();
        }

        let manager = self.clone();
        let task_key = key.clone();
        let guard = InFlightGuard {
            inner: self.inner.clone(),
            composite: composite.clone(),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            manager.run_fetch(&task_key, fetcher).await
        });

        let flight = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::Task(e.to_string())),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(composite, flight.clone());
        flight
    }

    async fn run_fetch<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> FetchResult
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fetched<T>, ProviderError>> + Send + 'static,
    {
        let inner = &self.inner;
        tracing::info!("Fetching {}", key);
        let fetched = inner
            .limiter
            .run(with_retry(&inner.retry, || fetcher()))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))??;
        let record = fetched.into_record(key.clone(), self.now())?;
        self.persist(&record);
        Ok(record)
    }

    fn persist(&self, record: &StoredRecord) {
        if let Err(e) = self.inner.store.write(record) {
            tracing::warn!("Failed to persist cache record {}: {}", record.key, e);
        }
    }
}
