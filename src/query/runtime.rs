//! The seam between the policy engine and the data-fetching runtime.
//!
//! The engine never performs I/O. It resolves a policy and hands
//! `(key, loader, policy)` to a [`QueryRuntime`], which runs the loader,
//! applies the windows to its store and drives retries.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::policy::key::CacheKey;
use crate::policy::resolver::ResolvedPolicy;
use crate::query::error::QueryError;

/// A type-erased cached value.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// A type-erased loader. Called once per attempt.
pub type Loader = Arc<dyn Fn() -> BoxFuture<'static, Result<CachedValue, QueryError>> + Send + Sync>;

/// Why the runtime is being asked for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Query,
    Prefetch,
}

/// Everything a runtime needs to serve one request.
#[derive(Clone)]
pub struct FetchRequest {
    pub key: CacheKey,
    pub resolved: ResolvedPolicy,
    pub loader: Loader,
    pub mode: FetchMode,
}

impl std::fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRequest")
            .field("key", &self.key)
            .field("resolved", &self.resolved)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait QueryRuntime: Send + Sync {
    /// Serve `request`, from cache or through its loader.
    async fn execute(&self, request: FetchRequest) -> Result<CachedValue, QueryError>;
}
