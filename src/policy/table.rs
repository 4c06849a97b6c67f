//! Per-tier cache windows and explicit overrides.
//!
//! The table encodes how much staleness each class of data tolerates:
//!
//! | Tier       | stale  | gc     | refetch on focus |
//! |------------|--------|--------|------------------|
//! | Static     | 900 s  | 3600 s | yes              |
//! | UserScoped | 120 s  | 600 s  | yes              |
//! | RealTime   | 30 s   | 300 s  | no               |
//! | Default    | 300 s  | 1800 s | yes              |
//!
//! Explicit configuration always wins over the table, field by field.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::retry::RetryPolicy;
use crate::policy::tier::Tier;

/// Parameters governing one cache entry's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age after which data is stale and eligible for background refresh.
    pub stale_time: Duration,
    /// Idle time after which an unused entry is purged.
    pub gc_time: Duration,
    pub refetch_on_focus: bool,
    pub retry: RetryPolicy,
}

/// Derive the default policy for a tier.
pub const fn derive_policy(tier: Tier) -> CachePolicy {
    let (stale, gc, refetch_on_focus) = match tier {
        Tier::Static => (900, 3600, true),
        Tier::UserScoped => (120, 600, true),
        Tier::RealTime => (30, 300, false),
        Tier::Default => (300, 1800, true),
    };
    CachePolicy {
        stale_time: Duration::from_secs(stale),
        gc_time: Duration::from_secs(gc),
        refetch_on_focus,
        retry: RetryPolicy::generic(),
    }
}

/// Explicit per-field overrides. `None` keeps whatever lies underneath.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    #[serde(
        rename = "stale_time_secs",
        with = "opt_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub stale_time: Option<Duration>,

    #[serde(
        rename = "gc_time_secs",
        with = "opt_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub gc_time: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refetch_on_focus: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(
        rename = "retry_ceiling_ms",
        with = "opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_ceiling: Option<Duration>,
}

impl PolicyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    pub fn with_refetch_on_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_focus = Some(refetch);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: Duration) -> Self {
        self.retry_ceiling = Some(ceiling);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Layer `self` on top of `below`; fields set in `self` win.
    pub fn over(self, below: PolicyOverrides) -> PolicyOverrides {
        PolicyOverrides {
            stale_time: self.stale_time.or(below.stale_time),
            gc_time: self.gc_time.or(below.gc_time),
            refetch_on_focus: self.refetch_on_focus.or(below.refetch_on_focus),
            max_attempts: self.max_attempts.or(below.max_attempts),
            retry_ceiling: self.retry_ceiling.or(below.retry_ceiling),
        }
    }

    /// Apply the overrides to a derived policy.
    pub fn apply(&self, mut policy: CachePolicy) -> CachePolicy {
        if let Some(stale_time) = self.stale_time {
            policy.stale_time = stale_time;
        }
        if let Some(gc_time) = self.gc_time {
            policy.gc_time = gc_time;
        }
        if let Some(refetch) = self.refetch_on_focus {
            policy.refetch_on_focus = refetch;
        }
        if let Some(max_attempts) = self.max_attempts {
            policy.retry.max_attempts = max_attempts;
        }
        if let Some(ceiling) = self.retry_ceiling {
            policy.retry.ceiling = ceiling;
        }
        policy
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_values() {
        let p = derive_policy(Tier::Static);
        assert_eq!(p.stale_time, Duration::from_secs(900));
        assert_eq!(p.gc_time, Duration::from_secs(3600));

        let p = derive_policy(Tier::UserScoped);
        assert_eq!(p.stale_time, Duration::from_secs(120));
        assert_eq!(p.gc_time, Duration::from_secs(600));

        let p = derive_policy(Tier::RealTime);
        assert_eq!(p.stale_time, Duration::from_secs(30));
        assert!(!p.refetch_on_focus);

        let p = derive_policy(Tier::Default);
        assert_eq!(p.stale_time, Duration::from_secs(300));
        assert_eq!(p.gc_time, Duration::from_secs(1800));
        assert_eq!(p.retry, RetryPolicy::generic());
    }

    #[test]
    fn test_override_wins_per_field() {
        let overrides = PolicyOverrides::new()
            .with_stale_time(Duration::from_secs(5))
            .with_max_attempts(0);
        let p = overrides.apply(derive_policy(Tier::Static));
        assert_eq!(p.stale_time, Duration::from_secs(5));
        assert_eq!(p.gc_time, Duration::from_secs(3600));
        assert_eq!(p.retry.max_attempts, 0);
    }

    #[test]
    fn test_layering() {
        let call = PolicyOverrides::new().with_stale_time(Duration::from_secs(1));
        let configured = PolicyOverrides::new()
            .with_stale_time(Duration::from_secs(60))
            .with_gc_time(Duration::from_secs(90));
        let merged = call.over(configured);
        assert_eq!(merged.stale_time, Some(Duration::from_secs(1)));
        assert_eq!(merged.gc_time, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_overrides_json_units() {
        let o: PolicyOverrides =
            serde_json::from_str(r#"{"stale_time_secs": 5, "retry_ceiling_ms": 2500}"#).unwrap();
        assert_eq!(o.stale_time, Some(Duration::from_secs(5)));
        assert_eq!(o.retry_ceiling, Some(Duration::from_millis(2500)));
        assert!(o.gc_time.is_none());

        let json = serde_json::to_string(&PolicyOverrides::new()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_huge_ceiling_serializes_saturated() {
        let o = PolicyOverrides::new().with_retry_ceiling(Duration::from_secs(u64::MAX));
        let value = serde_json::to_value(o).unwrap();
        assert_eq!(value["retry_ceiling_ms"], u64::MAX);
    }
}
