//! storefront-query-policy server.
//!
//! Runs the in-process query runtime and exposes the policy engine over HTTP
//! for inspection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use storefront_query_policy::config::{Cli, Config};
use storefront_query_policy::metrics::PolicyMetrics;
use storefront_query_policy::policy::PolicyResolver;
use storefront_query_policy::query::{new_shared_store, QueryClient};
use storefront_query_policy::server::policy_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "storefront_query_policy=debug,tower_http=debug"
    } else {
        "storefront_query_policy=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("storefront-query-policy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    let config = Arc::new(config);

    info!(
        base_delay_ms = config.retry.base_delay_ms,
        prefetch_enabled = config.prefetch.enabled,
        prefetch_stale_secs = config.prefetch.stale_time_secs,
        tier_overrides = config.tiers.len(),
        "Configuration loaded"
    );

    let metrics = Arc::new(PolicyMetrics::new()?);

    // The store and runtime live for the whole process.
    let store = new_shared_store();
    let client = QueryClient::new(store).with_metrics(metrics.clone());
    let sweeper =
        client.spawn_gc_sweeper(Duration::from_secs(config.store.gc_sweep_interval_secs.max(1)));

    let state = Arc::new(AppState {
        resolver: PolicyResolver::new(config.clone()),
        client,
        metrics,
        start_time: Instant::now(),
    });

    let app = build_router(state);

    let listen_addr = cli.listen.unwrap_or_else(|| config.server.listen.clone());
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
