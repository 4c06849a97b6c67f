//! Query cache policy.
//!
//! Everything in this module is pure and synchronous:
//! - [`key`]: CacheKey, KeySegment, PolicyError
//! - [`tier`]: Tier and the tier classifier
//! - [`table`]: per-tier windows and explicit overrides
//! - [`retry`]: retry eligibility and exponential backoff
//! - [`prefetch`]: the prefetch gate
//! - [`resolver`]: combines the above into one resolved policy per key

pub mod key;
pub mod prefetch;
pub mod resolver;
pub mod retry;
pub mod table;
pub mod tier;

pub use key::{CacheKey, KeySegment, PolicyError};
pub use prefetch::{should_prefetch, PrefetchDecision, PrefetchGate};
pub use resolver::{PolicyResolver, PrefetchPlan, ResolvedPolicy};
pub use retry::{QueryFailure, RetryPolicy, RetryProfile};
pub use table::{derive_policy, CachePolicy, PolicyOverrides};
pub use tier::{classify, Tier};
