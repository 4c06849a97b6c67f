//! Public fetch and prefetch entry points.
//!
//! `fetch` resolves the policy for a key, merges the caller's overrides and
//! hands `(key, loader, policy)` to the runtime. The returned handle exposes
//! the resolved policy immediately and resolves to the data when awaited.
//! A fetch is lazy; a prefetch starts loading as soon as it is issued and
//! keeps going when its handle is dropped.

use std::any::Any;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::metrics::PolicyMetrics;
use crate::policy::key::CacheKey;
use crate::policy::prefetch::PrefetchDecision;
use crate::policy::resolver::{PolicyResolver, ResolvedPolicy};
use crate::policy::table::{CachePolicy, PolicyOverrides};
use crate::policy::tier::Tier;
use crate::query::error::QueryError;
use crate::query::runtime::{CachedValue, FetchMode, FetchRequest, Loader, QueryRuntime};

/// Resolves policies and forwards requests to a runtime.
#[derive(Clone)]
pub struct QueryEngine {
    resolver: PolicyResolver,
    runtime: Arc<dyn QueryRuntime>,
    metrics: Option<Arc<PolicyMetrics>>,
}

impl QueryEngine {
    pub fn new(config: Arc<Config>, runtime: Arc<dyn QueryRuntime>) -> Self {
        Self {
            resolver: PolicyResolver::new(config),
            runtime,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PolicyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Fetch `key` through `loader` under the resolved policy.
    pub fn fetch<T, F, Fut>(&self, key: CacheKey, loader: F, overrides: PolicyOverrides) -> FetchHandle<T>
    where
        T: Any + Send + Sync,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let resolved = self.resolver.resolve(&key, &overrides);
        let future = self.dispatch(key.clone(), resolved.clone(), erase(loader), FetchMode::Query);
        FetchHandle {
            key,
            resolved,
            future,
            _marker: PhantomData,
        }
    }

    /// Speculatively load `key`, unless the prefetch gate refuses it.
    ///
    /// An allowed load is spawned on the current Tokio runtime right away;
    /// awaiting the handle only reports how it went.
    pub fn prefetch<T, F, Fut>(&self, key: CacheKey, loader: F, overrides: PolicyOverrides) -> PrefetchHandle
    where
        T: Any + Send + Sync,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let plan = self.resolver.resolve_prefetch(&key, &overrides);
        if let Some(metrics) = &self.metrics {
            metrics.record_prefetch(plan.decision);
        }

        let task = plan.resolved.clone().map(|resolved| {
            let key_name = key.to_string();
            let future = self.dispatch(key, resolved, erase(loader), FetchMode::Prefetch);
            (key_name, tokio::spawn(future))
        });

        PrefetchHandle {
            decision: plan.decision,
            resolved: plan.resolved,
            task,
        }
    }

    fn dispatch(
        &self,
        key: CacheKey,
        resolved: ResolvedPolicy,
        loader: Loader,
        mode: FetchMode,
    ) -> BoxFuture<'static, Result<CachedValue, QueryError>> {
        let runtime = self.runtime.clone();
        let request = FetchRequest {
            key,
            resolved,
            loader,
            mode,
        };
        async move { runtime.execute(request).await }.boxed()
    }
}

fn erase<T, F, Fut>(loader: F) -> Loader
where
    T: Any + Send + Sync,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = loader();
        async move { fut.await.map(|value| Arc::new(value) as CachedValue) }.boxed()
    })
}

/// A pending fetch. Await it for the data.
#[must_use = "a fetch does nothing until it is awaited"]
pub struct FetchHandle<T> {
    key: CacheKey,
    resolved: ResolvedPolicy,
    future: BoxFuture<'static, Result<CachedValue, QueryError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FetchHandle<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn tier(&self) -> Tier {
        self.resolved.tier
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.resolved.policy
    }

    pub fn resolved(&self) -> &ResolvedPolicy {
        &self.resolved
    }
}

impl<T: Any + Send + Sync> IntoFuture for FetchHandle<T> {
    type Output = Result<Arc<T>, QueryError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let FetchHandle { key, future, .. } = self;
        async move {
            let value = future.await?;
            value
                .downcast::<T>()
                .map_err(|_| QueryError::TypeMismatch { key: key.to_string() })
        }
        .boxed()
    }
}

/// What an awaited prefetch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// The key is now in the store.
    Loaded,
    /// The gate refused the key; nothing was loaded.
    Skipped(PrefetchDecision),
}

/// A running prefetch. Dropping the handle detaches the load.
pub struct PrefetchHandle {
    decision: PrefetchDecision,
    resolved: Option<ResolvedPolicy>,
    task: Option<(String, JoinHandle<Result<CachedValue, QueryError>>)>,
}

impl PrefetchHandle {
    pub fn decision(&self) -> PrefetchDecision {
        self.decision
    }

    pub fn is_skipped(&self) -> bool {
        self.task.is_none()
    }

    /// The prefetch policy, if the gate allowed the load.
    pub fn policy(&self) -> Option<&CachePolicy> {
        self.resolved.as_ref().map(|r| &r.policy)
    }
}

impl IntoFuture for PrefetchHandle {
    type Output = Result<PrefetchOutcome, QueryError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let decision = self.decision;
        match self.task {
            Some((key, task)) => async move {
                match task.await {
                    Ok(result) => result.map(|_| PrefetchOutcome::Loaded),
                    Err(err) => Err(QueryError::Aborted {
                        key,
                        reason: err.to_string(),
                    }),
                }
            }
            .boxed(),
            None => futures::future::ready(Ok(PrefetchOutcome::Skipped(decision))).boxed(),
        }
    }
}
