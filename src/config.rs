//! Runtime configuration for storefront-query-policy.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Missing sections and fields fall back to their defaults. The tier table
//! itself is fixed in code; `tiers` only carries explicit overrides on top.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::policy::table::PolicyOverrides;
use crate::policy::tier::Tier;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "storefront-query-policy",
    about = "Query cache policy engine and introspection server"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Retry limits per profile.
    pub retry: RetryConfig,

    /// Prefetch settings.
    pub prefetch: PrefetchConfig,

    /// Explicit per-tier overrides of the derived windows.
    pub tiers: BTreeMap<Tier, PolicyOverrides>,

    /// In-memory store settings.
    pub store: StoreConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Retry limits. Delays are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base of the exponential backoff.
    pub base_delay_ms: u64,

    pub generic_max_attempts: u32,
    pub generic_ceiling_ms: u64,

    /// Dashboard statistics.
    pub statistics_max_attempts: u32,
    pub statistics_ceiling_ms: u64,

    /// Dashboard alerts.
    pub alerts_max_attempts: u32,
    pub alerts_ceiling_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            generic_max_attempts: 2,
            generic_ceiling_ms: 30_000,
            statistics_max_attempts: 3,
            statistics_ceiling_ms: 30_000,
            alerts_max_attempts: 2,
            alerts_ceiling_ms: 10_000,
        }
    }
}

/// Prefetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Master switch for speculative loads.
    pub enabled: bool,

    /// Stale window for every allowed prefetch, regardless of tier.
    pub stale_time_secs: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time_secs: 600,
        }
    }
}

/// In-memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How often idle entries are swept.
    pub gc_sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_sweep_interval_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the file is absent.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
