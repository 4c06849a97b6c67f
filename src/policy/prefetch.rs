//! Prefetch gate: decides whether a key may be loaded speculatively.
//!
//! Prefetching must never eagerly populate caches for per-user data or for
//! data that is stale the moment it lands. The check here is
//! narrower than the tier classifier: it only looks for the literal
//! `"user-specific"` and `"real-time"` markers in the normalized key, plus
//! the namespace tag of tagged keys.
//!
//! Allowed prefetches use one uniform stale window (600 s by default)
//! instead of the tier-derived one.

use std::time::Duration;

use serde::Serialize;

use crate::config::PrefetchConfig;
use crate::policy::key::CacheKey;
use crate::policy::table::CachePolicy;
use crate::policy::tier::Tier;

/// Stale window applied to every allowed prefetch.
pub const PREFETCH_STALE_TIME: Duration = Duration::from_secs(600);

/// Outcome of the prefetch gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchDecision {
    Allowed,
    /// Prefetching is switched off in configuration.
    Disabled,
    UserSpecific,
    RealTime,
}

impl PrefetchDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PrefetchDecision::Allowed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrefetchDecision::Allowed => "allowed",
            PrefetchDecision::Disabled => "disabled",
            PrefetchDecision::UserSpecific => "user_specific",
            PrefetchDecision::RealTime => "real_time",
        }
    }
}

/// Whether `key` may be prefetched, ignoring configuration.
pub fn should_prefetch(key: &CacheKey) -> bool {
    gate(key).is_allowed()
}

fn gate(key: &CacheKey) -> PrefetchDecision {
    match key.namespace() {
        Some(Tier::UserScoped) => return PrefetchDecision::UserSpecific,
        Some(Tier::RealTime) => return PrefetchDecision::RealTime,
        _ => {}
    }

    let normalized = key.normalized();
    if normalized.contains("user-specific") {
        PrefetchDecision::UserSpecific
    } else if normalized.contains("real-time") {
        PrefetchDecision::RealTime
    } else {
        PrefetchDecision::Allowed
    }
}

/// Configured prefetch gate.
#[derive(Debug, Clone)]
pub struct PrefetchGate {
    config: PrefetchConfig,
}

impl PrefetchGate {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }

    pub fn decide(&self, key: &CacheKey) -> PrefetchDecision {
        if !self.config.enabled {
            return PrefetchDecision::Disabled;
        }
        gate(key)
    }

    /// Replace the tier-derived stale window with the prefetch window.
    pub fn prefetch_policy(&self, derived: CachePolicy) -> CachePolicy {
        CachePolicy {
            stale_time: Duration::from_secs(self.config.stale_time_secs),
            ..derived
        }
    }
}
