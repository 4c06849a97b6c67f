//! Query execution around the policy engine.
//!
//! - [`engine`]: `fetch` / `prefetch` entry points
//! - [`runtime`]: the runtime seam (`QueryRuntime`, `FetchRequest`)
//! - [`client`]: in-process runtime with retry, stale-while-revalidate and GC
//! - [`store`]: the explicit cache store handle
//! - [`error`]: query failures

pub mod client;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod store;

pub use client::QueryClient;
pub use engine::{FetchHandle, PrefetchHandle, PrefetchOutcome, QueryEngine};
pub use error::QueryError;
pub use runtime::{CachedValue, FetchMode, FetchRequest, Loader, QueryRuntime};
pub use store::{
    new_shared_store, QueryStore, RefreshClaim, SharedLoad, SharedQueryStore, StoredEntry,
    TierStats,
};
