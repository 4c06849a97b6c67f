//! Policy resolution: key → tier → windows + retry, with overrides merged.
//!
//! Precedence, highest first:
//! 1. call-site overrides
//! 2. per-tier overrides from configuration
//! 3. the derived tier table and the key's retry profile
//!
//! Resolution is pure. The same key with the same overrides always resolves
//! to the same policy, so a runtime may cache it next to the data.

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::policy::key::CacheKey;
use crate::policy::prefetch::{PrefetchDecision, PrefetchGate};
use crate::policy::retry::RetryProfile;
use crate::policy::table::{derive_policy, CachePolicy, PolicyOverrides};
use crate::policy::tier::{classify_normalized, Tier};

/// A fully resolved policy for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub normalized_key: String,
    pub tier: Tier,
    pub retry_profile: RetryProfile,
    pub policy: CachePolicy,
}

/// Outcome of resolving a prefetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchPlan {
    pub decision: PrefetchDecision,
    /// Present only when the prefetch is allowed.
    pub resolved: Option<ResolvedPolicy>,
}

/// Resolves cache policies from configuration.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    config: Arc<Config>,
    gate: PrefetchGate,
}

impl PolicyResolver {
    pub fn new(config: Arc<Config>) -> Self {
        let gate = PrefetchGate::new(config.prefetch.clone());
        Self { config, gate }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve the policy for a regular fetch.
    pub fn resolve(&self, key: &CacheKey, overrides: &PolicyOverrides) -> ResolvedPolicy {
        let (normalized, tier, retry_profile, base) = self.base(key);
        let policy = overrides.over(self.configured(tier)).apply(base);

        debug!(
            key = %key,
            tier = %tier,
            retry = retry_profile.as_str(),
            stale_ms = u64::try_from(policy.stale_time.as_millis()).unwrap_or(u64::MAX),
            "Resolved cache policy"
        );

        ResolvedPolicy {
            normalized_key: normalized,
            tier,
            retry_profile,
            policy,
        }
    }

    /// Resolve a speculative load. Gated-off keys get no policy at all.
    pub fn resolve_prefetch(&self, key: &CacheKey, overrides: &PolicyOverrides) -> PrefetchPlan {
        let decision = self.gate.decide(key);
        if !decision.is_allowed() {
            debug!(key = %key, decision = decision.as_str(), "Prefetch gated off");
            return PrefetchPlan {
                decision,
                resolved: None,
            };
        }

        let (normalized, tier, retry_profile, base) = self.base(key);
        let configured = self.configured(tier).apply(base);
        let policy = overrides.apply(self.gate.prefetch_policy(configured));

        PrefetchPlan {
            decision,
            resolved: Some(ResolvedPolicy {
                normalized_key: normalized,
                tier,
                retry_profile,
                policy,
            }),
        }
    }

    fn base(&self, key: &CacheKey) -> (String, Tier, RetryProfile, CachePolicy) {
        let normalized = key.normalized();
        let tier = key
            .namespace()
            .unwrap_or_else(|| classify_normalized(&normalized));
        let retry_profile = RetryProfile::for_normalized(&normalized);

        let mut policy = derive_policy(tier);
        policy.retry = retry_profile.policy(&self.config.retry);

        (normalized, tier, retry_profile, policy)
    }

    fn configured(&self, tier: Tier) -> PolicyOverrides {
        self.config.tiers.get(&tier).copied().unwrap_or_default()
    }
}
