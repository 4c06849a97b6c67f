//! Retry and backoff policy.
//!
//! Client errors (HTTP-like status 400..500) are never retried. Anything else
//! is retried while the attempt index is below `max_attempts`, waiting
//!
//! ```text
//! backoff_delay(i) = min(ceiling, base * 2^i)
//! ```
//!
//! between attempts. No jitter: the attempt index fully determines the delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// Base delay shared by every built-in profile.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// A failed load, as seen by the retry policy.
pub trait QueryFailure {
    /// HTTP-like status code, if the failure carries one.
    fn http_status(&self) -> Option<u16>;

    /// Failures that are never retried whatever their status.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Whether `status` is a client error (4xx).
pub fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

/// Bounded exponential retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub ceiling: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ceiling,
        }
    }

    /// Default policy for ordinary queries.
    pub const fn generic() -> Self {
        Self::new(2, DEFAULT_BASE_DELAY, Duration::from_millis(30_000))
    }

    /// Dashboard statistics.
    pub const fn statistics() -> Self {
        Self::new(3, DEFAULT_BASE_DELAY, Duration::from_millis(30_000))
    }

    /// Dashboard alerts.
    pub const fn alerts() -> Self {
        Self::new(2, DEFAULT_BASE_DELAY, Duration::from_millis(10_000))
    }

    /// Decide whether the failure at `attempt_index` (0 = first failure)
    /// should be retried.
    pub fn should_retry<E>(&self, attempt_index: u32, error: &E) -> bool
    where
        E: QueryFailure + ?Sized,
    {
        if error.is_terminal() || error.http_status().is_some_and(is_client_error) {
            return false;
        }
        attempt_index < self.max_attempts
    }

    /// Delay to wait before retrying the failure at `attempt_index`.
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        match self.base_delay.checked_mul(factor) {
            Some(delay) => delay.min(self.ceiling),
            None => self.ceiling,
        }
    }

    /// Every delay this policy will ever wait, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|i| self.backoff_delay(i)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::generic()
    }
}

/// Which retry profile a key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryProfile {
    Generic,
    Statistics,
    Alerts,
}

impl RetryProfile {
    /// Pick the profile for a normalized key.
    pub fn for_normalized(normalized: &str) -> Self {
        if !normalized.contains("dashboard") {
            return RetryProfile::Generic;
        }
        if normalized.contains("alert") {
            RetryProfile::Alerts
        } else if normalized.contains("stats") || normalized.contains("statistics") {
            RetryProfile::Statistics
        } else {
            RetryProfile::Generic
        }
    }

    /// Materialize the profile with the configured limits.
    pub fn policy(&self, config: &RetryConfig) -> RetryPolicy {
        let base = Duration::from_millis(config.base_delay_ms);
        match self {
            RetryProfile::Generic => RetryPolicy::new(
                config.generic_max_attempts,
                base,
                Duration::from_millis(config.generic_ceiling_ms),
            ),
            RetryProfile::Statistics => RetryPolicy::new(
                config.statistics_max_attempts,
                base,
                Duration::from_millis(config.statistics_ceiling_ms),
            ),
            RetryProfile::Alerts => RetryPolicy::new(
                config.alerts_max_attempts,
                base,
                Duration::from_millis(config.alerts_ceiling_ms),
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetryProfile::Generic => "generic",
            RetryProfile::Statistics => "statistics",
            RetryProfile::Alerts => "alerts",
        }
    }
}
