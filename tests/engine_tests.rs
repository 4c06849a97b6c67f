//! Integration tests for the fetch/prefetch entry points and the in-process runtime.

use std::future::IntoFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use storefront_query_policy::config::Config;
use storefront_query_policy::metrics::{FetchOutcome, PolicyMetrics};
use storefront_query_policy::policy::{CacheKey, KeySegment, PolicyOverrides, PrefetchDecision, Tier};
use storefront_query_policy::query::{
    new_shared_store, PrefetchOutcome, QueryClient, QueryEngine, QueryError,
};

fn setup() -> (QueryEngine, QueryClient) {
    let client = QueryClient::new(new_shared_store());
    let engine = QueryEngine::new(Arc::new(Config::default()), Arc::new(client.clone()));
    (engine, client)
}

fn key(segments: &[&str]) -> CacheKey {
    CacheKey::new(segments.iter().copied()).unwrap()
}

/// Loader returning the number of times it has been called.
fn counting_loader(
    calls: Arc<AtomicU32>,
) -> impl Fn() -> futures::future::Ready<Result<u32, QueryError>> + Send + Sync + 'static {
    move || futures::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
}

/// Loader that always fails with `status`.
fn failing_loader(
    calls: Arc<AtomicU32>,
    status: u16,
) -> impl Fn() -> futures::future::Ready<Result<u32, QueryError>> + Send + Sync + 'static {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Err(QueryError::http(status, "upstream failure")))
    }
}

/// Loader that reads the server-side version when called, then takes 5s.
fn versioned_loader(
    version: Arc<AtomicU32>,
) -> impl Fn() -> BoxFuture<'static, Result<u32, QueryError>> + Send + Sync + 'static {
    move || {
        let seen = version.load(Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(seen)
        }
        .boxed()
    }
}

/// Loader that takes 1s to return 7.
fn slow_loader(
    calls: Arc<AtomicU32>,
) -> impl Fn() -> BoxFuture<'static, Result<u32, QueryError>> + Send + Sync + 'static {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(7)
        }
        .boxed()
    }
}

/// Loader that succeeds once and panics on every later call.
fn crashing_loader(
    calls: Arc<AtomicU32>,
) -> impl Fn() -> futures::future::Ready<Result<u32, QueryError>> + Send + Sync + 'static {
    move || {
        if calls.fetch_add(1, Ordering::SeqCst) > 0 {
            panic!("loader crashed");
        }
        futures::future::ready(Ok(1))
    }
}

#[tokio::test]
async fn test_override_precedence_on_fetch() {
    let (engine, _) = setup();
    let handle = engine.fetch(
        key(&["drone", "list"]),
        || async { Ok::<_, QueryError>(vec!["m1".to_string(), "x9".to_string()]) },
        PolicyOverrides::new().with_stale_time(Duration::from_secs(5)),
    );

    assert_eq!(handle.tier(), Tier::Static);
    assert_eq!(handle.policy().stale_time, Duration::from_secs(5));
    assert_eq!(handle.policy().gc_time, Duration::from_secs(3600));

    let drones = handle.await.unwrap();
    assert_eq!(drones.len(), 2);
}

#[tokio::test]
async fn test_fresh_entries_served_from_store() {
    let (engine, _) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let value = engine
            .fetch(key(&["drone", "7"]), counting_loader(calls.clone()), PolicyOverrides::default())
            .await
            .unwrap();
        assert_eq!(*value, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_with_backoff() {
    let (engine, _) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let start = tokio::time::Instant::now();

    let result = engine
        .fetch(
            key(&["dashboard", "stats"]),
            failing_loader(calls.clone(), 503),
            PolicyOverrides::default(),
        )
        .await;

    assert!(matches!(result, Err(QueryError::Transient { status: Some(503), .. })));
    // First attempt plus three retries, waiting 1s + 2s + 4s.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_surface_immediately() {
    let (engine, _) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    let result = engine
        .fetch(
            key(&["drone", "missing"]),
            failing_loader(calls.clone(), 404),
            PolicyOverrides::default(),
        )
        .await;

    assert!(matches!(result, Err(QueryError::Client { status: 404, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_attempt_override_disables_retry() {
    let (engine, _) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    let result = engine
        .fetch(
            key(&["dashboard", "alerts"]),
            failing_loader(calls.clone(), 500),
            PolicyOverrides::new().with_max_attempts(0),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_served_while_refreshing() {
    let (engine, _) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let overrides = PolicyOverrides::new().with_stale_time(Duration::from_secs(1));
    let k = key(&["faq", "all"]);

    let first = engine.fetch(k.clone(), counting_loader(calls.clone()), overrides).await.unwrap();
    assert_eq!(*first, 1);

    tokio::time::advance(Duration::from_secs(2)).await;

    let stale = engine.fetch(k.clone(), counting_loader(calls.clone()), overrides).await.unwrap();
    assert_eq!(*stale, 1);

    // Let the background refresh run.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let refreshed = engine.fetch(k, counting_loader(calls.clone()), overrides).await.unwrap();
    assert_eq!(*refreshed, 2);
}

#[tokio::test]
async fn test_type_mismatch_is_reported() {
    let (engine, _) = setup();
    let k = key(&["drone", "list"]);

    engine
        .fetch(k.clone(), || async { Ok::<_, QueryError>(1u32) }, PolicyOverrides::default())
        .await
        .unwrap();

    let result = engine
        .fetch(k, || async { Ok::<_, QueryError>("one".to_string()) }, PolicyOverrides::default())
        .await;
    assert!(matches!(result, Err(QueryError::TypeMismatch { .. })));
}

#[tokio::test]
async fn test_gated_prefetch_never_calls_loader() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    let handle = engine.prefetch(
        key(&["user-specific", "profile"]),
        counting_loader(calls.clone()),
        PolicyOverrides::default(),
    );
    assert!(handle.is_skipped());
    assert!(handle.policy().is_none());

    let outcome = handle.await.unwrap();
    assert_eq!(outcome, PrefetchOutcome::Skipped(PrefetchDecision::UserSpecific));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(client.store().read().await.is_empty());
}

#[tokio::test]
async fn test_prefetch_populates_store_with_uniform_window() {
    let (engine, _) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let k = key(&["drone", "list"]);

    let handle = engine.prefetch(k.clone(), counting_loader(calls.clone()), PolicyOverrides::default());
    assert_eq!(handle.policy().unwrap().stale_time, Duration::from_secs(600));
    assert_eq!(handle.await.unwrap(), PrefetchOutcome::Loaded);

    let value = engine
        .fetch(k, counting_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();
    assert_eq!(*value, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_forces_refresh() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let k = key(&["drone", "list"]);

    engine.fetch(k.clone(), counting_loader(calls.clone()), PolicyOverrides::default()).await.unwrap();
    assert_eq!(client.invalidate(&[KeySegment::from("drone")]).await, 1);
    assert_eq!(client.invalidate(&[KeySegment::from("user")]).await, 0);

    let stale = engine.fetch(k.clone(), counting_loader(calls.clone()), PolicyOverrides::default()).await.unwrap();
    assert_eq!(*stale, 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let fresh = engine.fetch(k, counting_loader(calls.clone()), PolicyOverrides::default()).await.unwrap();
    assert_eq!(*fresh, 2);
}

#[tokio::test(start_paused = true)]
async fn test_focus_refetch_respects_policy() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    engine
        .fetch(key(&["user", "profile"]), counting_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();
    engine
        .fetch(key(&["payment", "status"]), counting_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(121)).await;

    // Only the user-scoped entry refetches on focus.
    assert_eq!(client.focus_refetch().await, 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_gc_sweep_evicts_idle_entries() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    engine
        .fetch(key(&["payment", "status"]), counting_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();
    engine
        .fetch(key(&["drone", "list"]), counting_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(client.sweep().await, 1);
    assert_eq!(client.store().read().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gc_sweeper_task() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    engine
        .fetch(key(&["payment", "status"]), counting_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();

    let sweeper = client.spawn_gc_sweeper(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(400)).await;
    assert!(client.store().read().await.is_empty());
    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_metrics_follow_fetches() {
    let metrics = Arc::new(PolicyMetrics::new().unwrap());
    let client = QueryClient::new(new_shared_store()).with_metrics(metrics.clone());
    let engine = QueryEngine::new(Arc::new(Config::default()), Arc::new(client))
        .with_metrics(metrics.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let k = key(&["drone", "list"]);

    engine.fetch(k.clone(), counting_loader(calls.clone()), PolicyOverrides::default()).await.unwrap();
    engine.fetch(k, counting_loader(calls.clone()), PolicyOverrides::default()).await.unwrap();
    let _ = engine
        .fetch(key(&["payment", "status"]), failing_loader(calls.clone(), 502), PolicyOverrides::default())
        .await;
    let _ = engine.prefetch(key(&["real-time", "feed"]), counting_loader(calls.clone()), PolicyOverrides::default());

    assert_eq!(metrics.fetch_count(Tier::Static, FetchOutcome::Loaded), 1);
    assert_eq!(metrics.fetch_count(Tier::Static, FetchOutcome::Hit), 1);
    assert_eq!(metrics.fetch_count(Tier::RealTime, FetchOutcome::Error), 1);
    assert_eq!(metrics.retry_count(Tier::RealTime), 2);
    assert!(metrics.render().unwrap().contains(r#"decision="real_time""#));
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_refresh_is_kept() {
    let (engine, client) = setup();
    let version = Arc::new(AtomicU32::new(1));
    let overrides = PolicyOverrides::new().with_stale_time(Duration::from_secs(60));
    let k = key(&["drone", "list"]);

    let first = engine.fetch(k.clone(), versioned_loader(version.clone()), overrides).await.unwrap();
    assert_eq!(*first, 1);

    // Stale fetch starts a refresh that reads version 1.
    client.invalidate(&[KeySegment::from("drone")]).await;
    let stale = engine.fetch(k.clone(), versioned_loader(version.clone()), overrides).await.unwrap();
    assert_eq!(*stale, 1);
    tokio::time::sleep(Duration::from_millis(1)).await;

    // The data changes while that refresh is in flight.
    version.store(2, Ordering::SeqCst);
    assert_eq!(client.invalidate(&[KeySegment::from("drone")]).await, 1);
    tokio::time::sleep(Duration::from_secs(6)).await;

    // The outdated refresh landed, but the entry is still stale.
    let now = tokio::time::Instant::now();
    assert!(client.store().read().await.get(&k).unwrap().is_stale(now));

    let again = engine.fetch(k.clone(), versioned_loader(version.clone()), overrides).await.unwrap();
    assert_eq!(*again, 1);
    tokio::time::sleep(Duration::from_secs(6)).await;

    let fresh = engine.fetch(k, versioned_loader(version.clone()), overrides).await.unwrap();
    assert_eq!(*fresh, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_prefetch_still_loads() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    drop(engine.prefetch(
        key(&["drone", "list"]),
        counting_loader(calls.clone()),
        PolicyOverrides::default(),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.store().read().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_load() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let k = key(&["drone", "list"]);

    let a = engine.fetch(k.clone(), slow_loader(calls.clone()), PolicyOverrides::default());
    let b = engine.fetch(k, slow_loader(calls.clone()), PolicyOverrides::default());
    let (a, b) = futures::future::join(a.into_future(), b.into_future()).await;

    assert_eq!(*a.unwrap(), 7);
    assert_eq!(*b.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.store().read().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_refresh_releases_entry() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let k = key(&["payment", "status"]);

    engine
        .fetch(k.clone(), crashing_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;

    let stale = engine
        .fetch(k.clone(), crashing_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();
    assert_eq!(*stale, 1);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!client.store().read().await.get(&k).unwrap().refreshing);

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(client.sweep().await, 1);
}

#[tokio::test]
async fn test_panicking_first_load_is_reported() {
    let (engine, client) = setup();
    let calls = Arc::new(AtomicU32::new(1));
    let k = key(&["drone", "7"]);

    let result = engine
        .fetch(k.clone(), crashing_loader(calls.clone()), PolicyOverrides::default())
        .await;
    assert!(matches!(result, Err(QueryError::Aborted { .. })));

    // The failed load does not linger.
    calls.store(0, Ordering::SeqCst);
    let value = engine
        .fetch(k, crashing_loader(calls.clone()), PolicyOverrides::default())
        .await
        .unwrap();
    assert_eq!(*value, 1);
    assert_eq!(client.store().read().await.len(), 1);
}
