//! Cache tiers and the tier classifier.
//!
//! Every request key lands in exactly one tier. Keys built with an explicit
//! namespace tag use it directly; string-keyed callers fall back to substring
//! matching on the normalized key, first match wins:
//!
//! ```text
//! RealTime   "payment" | "status"
//! UserScoped "user" | "order"
//! Static     "drone" && !"user"
//! Default    anything else
//! ```
//!
//! The storefront hooks historically disagreed on whether "drone" beats
//! "user"/"order". The order above is the canonical one; a key such as
//! `["drone", "order", 7]` is user-scoped.

use serde::{Deserialize, Serialize};

use crate::policy::key::CacheKey;

/// The cache class a request key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Reference data such as the drone catalogue.
    Static,
    /// Data scoped to the signed-in user (profile, orders).
    UserScoped,
    /// Payment and status data that goes stale almost immediately.
    RealTime,
    /// Everything else.
    Default,
}

impl Tier {
    /// All tiers, in classifier priority order.
    pub const ALL: [Tier; 4] = [Tier::RealTime, Tier::UserScoped, Tier::Static, Tier::Default];

    /// Stable lowercase name, used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Static => "static",
            Tier::UserScoped => "user_scoped",
            Tier::RealTime => "real_time",
            Tier::Default => "default",
        }
    }

    /// Whether speculative loads may populate this tier.
    pub fn allows_prefetch(&self) -> bool {
        !matches!(self, Tier::UserScoped | Tier::RealTime)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a key into its tier.
pub fn classify(key: &CacheKey) -> Tier {
    match key.namespace() {
        Some(tier) => tier,
        None => classify_normalized(&key.normalized()),
    }
}

/// Classify an already-normalized (lowercased, joined) key string.
pub fn classify_normalized(normalized: &str) -> Tier {
    if normalized.contains("payment") || normalized.contains("status") {
        Tier::RealTime
    } else if normalized.contains("user") || normalized.contains("order") {
        Tier::UserScoped
    } else if normalized.contains("drone") && !normalized.contains("user") {
        Tier::Static
    } else {
        Tier::Default
    }
}
