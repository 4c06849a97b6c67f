//! In-process query runtime.
//!
//! [`QueryClient`] serves requests from a [`SharedQueryStore`]:
//! 1. fresh entry: return it
//! 2. stale entry: return it and refresh in the background
//! 3. no entry: run the loader, retrying per the resolved policy, and store
//!    the result
//!
//! Concurrent misses on one key share a single load. A loader that panics is
//! reported as [`QueryError::Aborted`] and never leaves an entry stuck in the
//! refreshing state.
//!
//! It also exposes the lifecycle hooks a UI would drive: invalidation after
//! mutations, refetch when the window regains focus, and periodic GC.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::{FetchOutcome, PolicyMetrics};
use crate::policy::key::{CacheKey, KeySegment};
use crate::policy::table::CachePolicy;
use crate::policy::tier::Tier;
use crate::query::error::QueryError;
use crate::query::runtime::{CachedValue, FetchRequest, Loader, QueryRuntime};
use crate::query::store::{RefreshClaim, SharedLoad, SharedQueryStore};

/// The in-process runtime.
#[derive(Clone)]
pub struct QueryClient {
    store: SharedQueryStore,
    metrics: Option<Arc<PolicyMetrics>>,
}

impl QueryClient {
    pub fn new(store: SharedQueryStore) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PolicyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &SharedQueryStore {
        &self.store
    }

    /// Mark every entry under `prefix` stale. The next request refreshes it.
    pub async fn invalidate(&self, prefix: &[KeySegment]) -> usize {
        let marked = self.store.write().await.invalidate_prefix(prefix);
        info!(marked, "Invalidated entries");
        marked
    }

    /// Refresh stale entries whose policy refetches on focus.
    /// Returns the number of refreshes started.
    pub async fn focus_refetch(&self) -> usize {
        let claimed = self.store.write().await.claim_focus_refetches(Instant::now());
        let started = claimed.len();
        for claim in claimed {
            self.spawn_refresh(claim);
        }
        debug!(started, "Focus refetch");
        started
    }

    /// Evict idle entries now. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let mut store = self.store.write().await;
        let evicted = store.sweep(Instant::now()).len();
        if let Some(metrics) = &self.metrics {
            metrics.set_store_entries(store.len());
        }
        evicted
    }

    /// Run [`QueryClient::sweep`] every `interval` until the task is aborted.
    pub fn spawn_gc_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = client.sweep().await;
                if evicted > 0 {
                    info!(evicted, "GC sweep complete");
                }
            }
        })
    }

    fn spawn_refresh(&self, claim: RefreshClaim) {
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let RefreshClaim {
                key,
                tier,
                policy,
                loader,
                generation,
            } = claim;
            let result = guarded_load(&key, tier, &policy, &loader, metrics.as_deref()).await;
            let mut store = store.write().await;
            match result {
                Ok(value) => {
                    if store.complete_refresh(&key, value, generation, Instant::now()) {
                        debug!(key = %key, tier = %tier, "Background refresh complete");
                    }
                }
                Err(err) => {
                    warn!(key = %key, tier = %tier, error = %err, "Background refresh failed");
                    store.abort_refresh(&key);
                }
            }
        });
    }

    /// Build the shared first load for `key`. It stores the value and clears
    /// the pending slot itself, so it completes even if the caller that
    /// started it goes away.
    fn shared_load(&self, key: CacheKey, tier: Tier, policy: CachePolicy, loader: Loader) -> SharedLoad {
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        async move {
            let result = guarded_load(&key, tier, &policy, &loader, metrics.as_deref()).await;
            let mut store = store.write().await;
            store.finish_load(&key);
            if let Ok(value) = &result {
                store.store_loaded(key, value.clone(), tier, policy, loader, Instant::now());
                if let Some(metrics) = &metrics {
                    metrics.set_store_entries(store.len());
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    fn record(&self, tier: Tier, outcome: FetchOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(tier, outcome);
        }
    }
}

#[async_trait]
impl QueryRuntime for QueryClient {
    async fn execute(&self, request: FetchRequest) -> Result<CachedValue, QueryError> {
        let FetchRequest {
            key,
            resolved,
            loader,
            mode,
        } = request;
        let tier = resolved.tier;
        let policy = resolved.policy;
        let now = Instant::now();

        let load = {
            let mut store = self.store.write().await;
            if let Some(entry) = store.get_mut(&key) {
                entry.last_accessed = now;
                entry.tier = tier;
                entry.policy = policy;
                entry.loader = loader.clone();

                if !entry.is_stale(now) {
                    self.record(tier, FetchOutcome::Hit);
                    return Ok(entry.value.clone());
                }

                let value = entry.value.clone();
                let generation = entry.generation;
                let start_refresh = !entry.refreshing;
                entry.refreshing = true;

                self.record(tier, FetchOutcome::Stale);
                if start_refresh {
                    debug!(key = %key, tier = %tier, ?mode, "Serving stale, refreshing");
                    self.spawn_refresh(RefreshClaim {
                        key,
                        tier,
                        policy,
                        loader,
                        generation,
                    });
                }
                return Ok(value);
            }

            match store.pending_load(&key) {
                Some(load) => {
                    debug!(key = %key, tier = %tier, ?mode, "Joining in-flight load");
                    load
                }
                None => {
                    let load = self.shared_load(key.clone(), tier, policy, loader);
                    store.begin_load(key, load.clone());
                    load
                }
            }
        };

        let result = load.await;
        match &result {
            Ok(_) => self.record(tier, FetchOutcome::Loaded),
            Err(_) => self.record(tier, FetchOutcome::Error),
        }
        result
    }
}

/// [`load_with_retry`], with a panicking loader turned into an error.
async fn guarded_load(
    key: &CacheKey,
    tier: Tier,
    policy: &CachePolicy,
    loader: &Loader,
    metrics: Option<&PolicyMetrics>,
) -> Result<CachedValue, QueryError> {
    match AssertUnwindSafe(load_with_retry(key, tier, policy, loader, metrics))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!(key = %key, tier = %tier, "Loader panicked");
            Err(QueryError::Aborted {
                key: key.to_string(),
                reason: "loader panicked".to_string(),
            })
        }
    }
}

/// Run `loader` until it succeeds or the retry policy gives up.
async fn load_with_retry(
    key: &CacheKey,
    tier: Tier,
    policy: &CachePolicy,
    loader: &Loader,
    metrics: Option<&PolicyMetrics>,
) -> Result<CachedValue, QueryError> {
    let mut attempt = 0;
    loop {
        match loader().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !policy.retry.should_retry(attempt, &err) {
                    warn!(key = %key, tier = %tier, attempt, error = %err, "Load failed");
                    return Err(err);
                }
                let delay = policy.retry.backoff_delay(attempt);
                debug!(
                    key = %key,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying load"
                );
                if let Some(metrics) = metrics {
                    metrics.record_retry(tier);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
