//! Single-flight computation cache.
//!
//! Results are keyed by `(domain, period, date range)`. Concurrent requests for
//! a key that is being computed join the running computation instead of
//! starting their own, and all of them receive the same result.

mod key;

pub use key::CacheKey;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, warn};

use innsight_core::{DateRange, Period};

use crate::panic_message;

/// Cache error. Clonable so every joined caller gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("computation for {key} failed: {message}")]
    Compute { key: CacheKey, message: String },
    /// The computation panicked or its task was torn down.
    #[error("computation for {key} was aborted")]
    Aborted { key: CacheKey },
}

impl CacheError {
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheError::Compute { key, .. } | CacheError::Aborted { key } => key,
        }
    }
}

/// How a [`Cached`] value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// Served from a stored entry.
    Stored,
    /// This caller started the computation.
    Computed,
    /// This caller joined a computation started by someone else.
    Joined,
}

/// A value returned by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub computed_at: DateTime<Utc>,
    pub source: CacheSource,
}

impl<V> Cached<V> {
    /// True unless this caller ran the computation itself.
    pub fn was_cached(&self) -> bool {
        !matches!(self.source, CacheSource::Computed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Entries older than this are recomputed. `None` keeps entries until invalidated.
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    computed_at: DateTime<Utc>,
    stored_at: Instant,
}

impl<V: Clone> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            computed_at: Utc::now(),
            stored_at: Instant::now(),
        }
    }

    fn to_cached(&self, source: CacheSource) -> Cached<V> {
        Cached {
            value: self.value.clone(),
            computed_at: self.computed_at,
            source,
        }
    }
}

type SharedCompute<V> = Shared<BoxFuture<'static, Result<CacheEntry<V>, CacheError>>>;

struct InFlight<V> {
    /// Distinguishes this computation from a later one for the same key.
    generation: u64,
    future: SharedCompute<V>,
}

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    in_flight: HashMap<CacheKey, InFlight<V>>,
    next_generation: u64,
}

struct CacheInner<V> {
    state: Mutex<CacheState<V>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
}

impl<V> CacheInner<V> {
    // The only user code run under the lock is the `compute` closure, called
    // after the bookkeeping for a miss is done and before anything is
    // inserted. A panic there leaves the maps consistent, so poisoning is
    // ignored.
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        self.config
            .ttl
            .map_or(true, |ttl| entry.stored_at.elapsed() < ttl)
    }
}

impl<V: Clone> CacheInner<V> {
    /// Publish a finished computation: drop the in-flight marker and store the
    /// value in one critical section.
    ///
    /// Skipped when the key was invalidated (or recomputed) meanwhile.
    fn settle(&self, key: &CacheKey, generation: u64, result: &Result<CacheEntry<V>, CacheError>) {
        let mut state = self.lock();
        match state.in_flight.get(key) {
            Some(current) if current.generation == generation => {
                state.in_flight.remove(key);
            }
            _ => {
                debug!(key = %key, "discarding result of an invalidated computation");
                return;
            }
        }
        if let Ok(entry) = result {
            state.entries.insert(key.clone(), entry.clone());
        }
    }
}

/// Memoizes expensive computations with single-flight deduplication.
///
/// Cloning is cheap and clones share the same entries.
pub struct ComputationCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for ComputationCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for ComputationCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> ComputationCache<V> {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_generation: 0,
                }),
                config,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                joins: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the cached value for the key, computing it at most once.
    ///
    /// `compute` is only invoked when no valid entry exists and no computation
    /// for the key is in flight. The computation runs on its own tokio task, so
    /// it completes and is stored even if every caller goes away. Errors are
    /// returned to all waiting callers and are never stored.
    ///
    /// `compute` itself is called while the cache lock is held: it should only
    /// build the future and must not call back into this cache. The returned
    /// future runs unlocked.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        domain: &str,
        period: Period,
        range: DateRange,
        compute: F,
    ) -> Result<Cached<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let key = CacheKey::new(domain, period, range);

        let (future, source) = {
            let mut state = self.inner.lock();

            match state.entries.get(&key) {
                Some(entry) if self.inner.is_fresh(entry) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.to_cached(CacheSource::Stored));
                }
                Some(_) => {
                    state.entries.remove(&key);
                }
                None => {}
            }

            if let Some(running) = state.in_flight.get(&key) {
                self.inner.joins.fetch_add(1, Ordering::Relaxed);
                (running.future.clone(), CacheSource::Joined)
            } else {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                let generation = state.next_generation;
                state.next_generation += 1;

                let future = self.launch(key.clone(), generation, compute());
                state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        generation,
                        future: future.clone(),
                    },
                );
                (future, CacheSource::Computed)
            }
        };

        let entry = future.await?;
        Ok(entry.to_cached(source))
    }

    /// Spawn the computation and wrap its outcome in a shareable future.
    ///
    /// Called with the state lock held; the task's `settle` waits for it.
    fn launch<Fut, E>(&self, key: CacheKey, generation: u64, fut: Fut) -> SharedCompute<V>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => Ok(CacheEntry::new(value)),
                Ok(Err(e)) => {
                    let message = e.to_string();
                    warn!(key = %task_key, error = %message, "cached computation failed");
                    Err(CacheError::Compute {
                        key: task_key.clone(),
                        message,
                    })
                }
                Err(panic) => {
                    error!(key = %task_key, panic = %panic_message(panic), "cached computation panicked");
                    Err(CacheError::Aborted {
                        key: task_key.clone(),
                    })
                }
            };
            inner.settle(&task_key, generation, &result);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|_| Err(CacheError::Aborted { key }))
        }
        .boxed()
        .shared()
    }

    /// Stored value for the key, if present and still fresh. Never computes.
    pub fn get(&self, domain: &str, period: Period, range: DateRange) -> Option<Cached<V>> {
        let key = CacheKey::new(domain, period, range);
        let state = self.inner.lock();
        state
            .entries
            .get(&key)
            .filter(|entry| self.inner.is_fresh(entry))
            .map(|entry| entry.to_cached(CacheSource::Stored))
    }

    /// Drop the entry for one key. A computation in flight for it still
    /// answers its callers but its result is not stored.
    pub fn invalidate(&self, domain: &str, period: Period, range: DateRange) -> bool {
        let key = CacheKey::new(domain, period, range);
        let mut state = self.inner.lock();
        let had_running = state.in_flight.remove(&key).is_some();
        state.entries.remove(&key).is_some() || had_running
    }

    /// Drop every entry of a domain. Returns the number of stored entries removed.
    pub fn invalidate_domain(&self, domain: &str) -> usize {
        let mut state = self.inner.lock();
        state.in_flight.retain(|key, _| key.domain() != domain);
        let before = state.entries.len();
        state.entries.retain(|key, _| key.domain() != domain);
        before - state.entries.len()
    }

    /// Drop everything. Returns the number of stored entries removed.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.lock();
        state.in_flight.clear();
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    /// Remove entries past their TTL. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        if self.inner.config.ttl.is_none() {
            return 0;
        }
        let mut state = self.inner.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| self.inner.is_fresh(entry));
        before - state.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            joins: self.inner.joins.load(Ordering::Relaxed),
        }
    }
}
