//! storefront-query-policy: query cache policy engine for the drone storefront.
//!
//! Classifies request keys into cache tiers, derives staleness and
//! garbage-collection windows, retry backoff and prefetch eligibility, and
//! hands `(key, loader, policy)` to a data-fetching runtime.
//!
//! ```text
//! CacheKey ──classify──▶ Tier ──derive──▶ CachePolicy ──overrides──▶ QueryRuntime
//! ```

pub mod config;
pub mod metrics;
pub mod policy;
pub mod query;
pub mod server;
