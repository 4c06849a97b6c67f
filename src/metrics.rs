//! Prometheus metrics for policy decisions and the in-memory store.
//!
//! Metrics live in an explicit registry owned by [`PolicyMetrics`], never the
//! process-wide default one.

use prometheus::{IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::policy::prefetch::PrefetchDecision;
use crate::policy::tier::Tier;

/// How a fetch was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Fresh cached value.
    Hit,
    /// Stale cached value, refresh scheduled.
    Stale,
    /// Loaded through the loader.
    Loaded,
    /// Terminal failure surfaced to the caller.
    Error,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Hit => "hit",
            FetchOutcome::Stale => "stale",
            FetchOutcome::Loaded => "loaded",
            FetchOutcome::Error => "error",
        }
    }
}

pub struct PolicyMetrics {
    registry: Registry,
    fetch_total: IntCounterVec,
    retry_total: IntCounterVec,
    prefetch_total: IntCounterVec,
    store_entries: IntGauge,
}

impl PolicyMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let fetch_total = IntCounterVec::new(
            Opts::new("query_fetch_total", "Fetches by tier and outcome"),
            &["tier", "outcome"],
        )?;
        let retry_total = IntCounterVec::new(
            Opts::new("query_retry_total", "Retries scheduled by tier"),
            &["tier"],
        )?;
        let prefetch_total = IntCounterVec::new(
            Opts::new("query_prefetch_total", "Prefetch gate decisions"),
            &["decision"],
        )?;
        let store_entries = IntGauge::new("query_store_entries", "Entries held by the store")?;

        registry.register(Box::new(fetch_total.clone()))?;
        registry.register(Box::new(retry_total.clone()))?;
        registry.register(Box::new(prefetch_total.clone()))?;
        registry.register(Box::new(store_entries.clone()))?;

        Ok(Self {
            registry,
            fetch_total,
            retry_total,
            prefetch_total,
            store_entries,
        })
    }

    pub fn record_fetch(&self, tier: Tier, outcome: FetchOutcome) {
        self.fetch_total
            .with_label_values(&[tier.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn record_retry(&self, tier: Tier) {
        self.retry_total.with_label_values(&[tier.as_str()]).inc();
    }

    pub fn record_prefetch(&self, decision: PrefetchDecision) {
        self.prefetch_total
            .with_label_values(&[decision.as_str()])
            .inc();
    }

    pub fn set_store_entries(&self, entries: usize) {
        self.store_entries.set(entries as i64);
    }

    pub fn fetch_count(&self, tier: Tier, outcome: FetchOutcome) -> u64 {
        self.fetch_total
            .with_label_values(&[tier.as_str(), outcome.as_str()])
            .get()
    }

    pub fn retry_count(&self, tier: Tier) -> u64 {
        self.retry_total.with_label_values(&[tier.as_str()]).get()
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
