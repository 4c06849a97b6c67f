//! Policy introspection API.
//!
//! - GET /health
//! - POST /v1/policy/resolve
//! - POST /v1/policy/retry
//! - GET /v1/cache/stats
//! - POST /v1/cache/invalidate
//! - POST /v1/cache/focus
//! - GET /metrics

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::PolicyMetrics;
use crate::policy::key::{CacheKey, KeySegment, PolicyError};
use crate::policy::prefetch::PrefetchDecision;
use crate::policy::resolver::PolicyResolver;
use crate::policy::retry::RetryProfile;
use crate::policy::table::PolicyOverrides;
use crate::policy::tier::Tier;
use crate::query::client::QueryClient;
use crate::query::error::QueryError;
use crate::query::store::TierStats;

/// Application state shared across handlers.
pub struct AppState {
    pub resolver: PolicyResolver,
    pub client: QueryClient,
    pub metrics: Arc<PolicyMetrics>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/policy/resolve", post(resolve_policy))
        .route("/v1/policy/retry", post(retry_decision))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/invalidate", post(invalidate))
        .route("/v1/cache/focus", post(focus))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Policy resolution request.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub key: Vec<KeySegment>,
    /// Explicit namespace tag; wins over substring classification.
    #[serde(default)]
    pub namespace: Option<Tier>,
    #[serde(default)]
    pub overrides: PolicyOverrides,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub normalized_key: String,
    pub tier: Tier,
    pub stale_time_ms: u64,
    pub gc_time_ms: u64,
    pub refetch_on_focus: bool,
    pub retry: RetryResponse,
    pub prefetch: PrefetchResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub profile: RetryProfile,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub ceiling_ms: u64,
    pub schedule_ms: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefetchResponse {
    pub allowed: bool,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_time_ms: Option<u64>,
}

/// Retry decision request: would the failure at `attempt` be retried?
#[derive(Debug, Deserialize)]
pub struct RetryDecisionRequest {
    pub key: Vec<KeySegment>,
    pub attempt: u32,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub overrides: PolicyOverrides,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryDecisionResponse {
    pub retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Invalidation request: mark every entry under `prefix` stale.
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub prefix: Vec<KeySegment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub marked: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FocusResponse {
    pub refreshing: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStatsResponse,
}

/// Store statistics response.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub total_entries: usize,
    pub tiers: BTreeMap<Tier, TierStats>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(request_id: &str, err: impl std::fmt::Display) -> ApiError {
    warn!(request_id, error = %err, "Rejected request");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn build_key(segments: Vec<KeySegment>, namespace: Option<Tier>) -> Result<CacheKey, PolicyError> {
    let key = CacheKey::new(segments)?;
    Ok(match namespace {
        Some(tier) => key.with_namespace(tier),
        None => key,
    })
}

/// Milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn resolve_policy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let key = build_key(req.key, req.namespace).map_err(|e| bad_request(&request_id, e))?;

    let resolved = state.resolver.resolve(&key, &req.overrides);
    let plan = state.resolver.resolve_prefetch(&key, &req.overrides);
    state.metrics.record_prefetch(plan.decision);

    info!(
        request_id,
        key = %key,
        tier = %resolved.tier,
        prefetch = plan.decision.as_str(),
        "Policy resolved"
    );

    let retry = resolved.policy.retry;
    Ok(Json(ResolveResponse {
        normalized_key: resolved.normalized_key,
        tier: resolved.tier,
        stale_time_ms: millis(resolved.policy.stale_time),
        gc_time_ms: millis(resolved.policy.gc_time),
        refetch_on_focus: resolved.policy.refetch_on_focus,
        retry: RetryResponse {
            profile: resolved.retry_profile,
            max_attempts: retry.max_attempts,
            base_delay_ms: millis(retry.base_delay),
            ceiling_ms: millis(retry.ceiling),
            schedule_ms: retry.schedule().into_iter().map(millis).collect(),
        },
        prefetch: PrefetchResponse {
            allowed: plan.decision == PrefetchDecision::Allowed,
            decision: plan.decision.as_str().to_string(),
            stale_time_ms: plan.resolved.map(|r| millis(r.policy.stale_time)),
        },
    }))
}

async fn retry_decision(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetryDecisionRequest>,
) -> Result<Json<RetryDecisionResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let key = build_key(req.key, None).map_err(|e| bad_request(&request_id, e))?;
    let retry = state.resolver.resolve(&key, &req.overrides).policy.retry;

    let error = match req.status {
        Some(status) => QueryError::http(status, "reported failure"),
        None => QueryError::network("reported failure"),
    };

    let should_retry = retry.should_retry(req.attempt, &error);
    Ok(Json(RetryDecisionResponse {
        retry: should_retry,
        delay_ms: should_retry.then(|| millis(retry.backoff_delay(req.attempt))),
    }))
}

async fn collect_stats(state: &AppState) -> CacheStatsResponse {
    let store = state.client.store().read().await;
    CacheStatsResponse {
        total_entries: store.len(),
        tiers: store.tier_stats(tokio::time::Instant::now()),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache: collect_stats(&state).await,
    })
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(collect_stats(&state).await)
}

async fn invalidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvalidateRequest>,
) -> Json<InvalidateResponse> {
    let marked = state.client.invalidate(&req.prefix).await;
    Json(InvalidateResponse { marked })
}

async fn focus(State(state): State<Arc<AppState>>) -> Json<FocusResponse> {
    Json(FocusResponse {
        refreshing: state.client.focus_refetch().await,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, StatusCode> {
    let body = state
        .metrics
        .render()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
