//! Freshness, deduplication and eviction of the query cache

use beanmarket_client::{QueryCache, QueryError, QueryStatus};
use beanmarket_core::{CacheConfig, ManualTimeSource, QueryKey, Timestamp};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn cache_with_clock() -> (QueryCache<Vec<String>>, ManualTimeSource) {
    let clock = ManualTimeSource::starting_at(Timestamp::new(1_700_000_000_000));
    let cache = QueryCache::with_time_source(CacheConfig::testing(), Arc::new(clock.clone()));
    (cache, clock)
}

/// Fetcher factory counting invocations and tagging results with the count
fn counting(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<Result<Vec<String>, QueryError>> {
    let calls = Arc::clone(calls);
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        futures::future::ready(Ok(vec![format!("v{n}")]))
    }
}

#[tokio::test]
async fn test_fresh_then_stale_while_revalidate() {
    let (cache, clock) = cache_with_clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::builder("coffees").param("search", "ethiopia").build();
    let ttl = Duration::from_secs(5 * 60);

    let mut first = cache.get_or_fetch(key.clone(), counting(&calls), ttl);
    assert_eq!(first.settled().await.data(), Some(&vec!["v1".to_string()]));

    clock.advance(Duration::from_secs(4 * 60));
    let second = cache.get_or_fetch(key.clone(), counting(&calls), ttl);
    let state = second.state();
    assert_eq!(state.data(), Some(&vec!["v1".to_string()]));
    assert!(!state.is_fetching);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_secs(61));
    let mut third = cache.get_or_fetch(key.clone(), counting(&calls), ttl);
    let immediate = third.state();
    assert_eq!(immediate.data(), Some(&vec!["v1".to_string()]));
    assert!(immediate.is_fetching);
    assert!(!immediate.is_loading());

    let settled = third.settled().await;
    assert_eq!(settled.data(), Some(&vec!["v2".to_string()]));
    assert_eq!(settled.status, QueryStatus::Fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!(stats.fetches, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.stale_hits, 1);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_fetch() {
    let (cache, _clock) = cache_with_clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());
    let key = QueryKey::new("posts");

    let fetcher = |calls: Arc<AtomicUsize>, gate: Arc<Notify>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Ok(vec!["post".to_string()])
        }
    };

    let mut a = cache.query(key.clone(), fetcher(Arc::clone(&calls), Arc::clone(&gate)));
    let mut b = cache.query(key.clone(), fetcher(Arc::clone(&calls), Arc::clone(&gate)));
    assert!(a.state().is_loading());
    assert!(b.state().is_loading());
    assert_eq!(cache.stats().fetches, 1);

    gate.notify_one();
    let (sa, sb) = tokio::join!(a.settled(), b.settled());
    assert_eq!(sa.data(), sb.data());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalidation_during_fetch_lands_stale() {
    let (cache, _clock) = cache_with_clock();
    let gate = Arc::new(Notify::new());
    let key = QueryKey::new("users");

    let wait = Arc::clone(&gate);
    let mut sub = cache.query(key.clone(), move || async move {
        wait.notified().await;
        Ok(vec!["old".to_string()])
    });

    assert_eq!(cache.invalidate("users"), 1);
    gate.notify_one();

    let state = sub.settled().await;
    assert_eq!(state.data(), Some(&vec!["old".to_string()]));
    assert_eq!(state.status, QueryStatus::Stale);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut again = cache.query(key, counting(&calls));
    assert_eq!(again.settled().await.data(), Some(&vec!["v1".to_string()]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_refetch_ignores_freshness() {
    let (cache, _clock) = cache_with_clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new("coffees");

    cache.query(key.clone(), counting(&calls)).settled().await;
    let mut forced = cache.refetch(key.clone(), counting(&calls));
    assert_eq!(forced.settled().await.data(), Some(&vec!["v2".to_string()]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fresh_entry_reads_stale_after_stale_time() {
    let (cache, clock) = cache_with_clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new("posts");

    let mut sub = cache.query(key.clone(), counting(&calls));
    assert_eq!(sub.settled().await.status, QueryStatus::Fresh);

    clock.advance(Duration::from_millis(1_500));
    assert_eq!(sub.state().status, QueryStatus::Stale);
    assert_eq!(cache.peek(&key).map(|s| s.status), Some(QueryStatus::Stale));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_evicts_unobserved_entries() {
    let (cache, clock) = cache_with_clock();
    let calls = Arc::new(AtomicUsize::new(0));

    let held = cache.query(QueryKey::new("users"), counting(&calls));
    cache.query(QueryKey::new("posts"), counting(&calls)).settled().await;
    assert_eq!(cache.len(), 2);

    let sweeper = cache.spawn_sweeper();
    clock.advance(Duration::from_secs(6));
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(cache.len(), 1);
    assert!(cache.peek(held.key()).is_some());
    assert_eq!(cache.stats().evictions, 1);

    drop(held);
    drop(cache);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(sweeper.is_finished());
}

#[tokio::test]
async fn test_panicking_fetcher_settles_as_error() {
    let (cache, _clock) = cache_with_clock();
    let key = QueryKey::new("coffees");

    let mut broken = cache.query(key.clone(), || async {
        let rows: Vec<String> = Vec::new();
        assert!(!rows.is_empty(), "decoder blew up");
        Ok(rows)
    });
    let state = broken.settled().await;
    assert_eq!(state.status, QueryStatus::Error);
    assert!(!state.is_fetching);
    assert!(matches!(state.error, Some(QueryError::Aborted { .. })));

    let calls = Arc::new(AtomicUsize::new(0));
    let mut retry = cache.query(key, counting(&calls));
    let state = retry.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.status, QueryStatus::Fresh);
    assert_eq!(state.data(), Some(&vec!["v1".to_string()]));
}

#[tokio::test]
async fn test_removed_entry_ignores_late_result() {
    let (cache, _clock) = cache_with_clock();
    let key = QueryKey::new("posts");
    let gated = |gate: Arc<Notify>, value: &'static str| {
        move || async move {
            gate.notified().await;
            Ok(vec![value.to_string()])
        }
    };

    let first_gate = Arc::new(Notify::new());
    let _first = cache.query(key.clone(), gated(Arc::clone(&first_gate), "before-remove"));
    assert!(cache.remove(&key));

    let second_gate = Arc::new(Notify::new());
    let mut second = cache.query(key.clone(), gated(Arc::clone(&second_gate), "after-remove"));
    assert_eq!(cache.stats().fetches, 2);

    first_gate.notify_one();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let pending = second.state();
    assert!(pending.is_fetching);
    assert!(pending.data().is_none());

    second_gate.notify_one();
    let state = second.settled().await;
    assert_eq!(state.data(), Some(&vec!["after-remove".to_string()]));
    assert_eq!(state.status, QueryStatus::Fresh);
}

#[tokio::test]
async fn test_cleared_cache_ignores_late_result() {
    let (cache, _clock) = cache_with_clock();
    let key = QueryKey::new("users");
    let gate = Arc::new(Notify::new());

    let wait = Arc::clone(&gate);
    let _stale = cache.query(key.clone(), move || async move {
        wait.notified().await;
        Ok(vec!["late".to_string()])
    });
    cache.clear();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut fresh = cache.query(key.clone(), counting(&calls));
    assert_eq!(fresh.settled().await.data(), Some(&vec!["v1".to_string()]));

    gate.notify_one();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(cache.peek(&key).unwrap().data(), Some(&vec!["v1".to_string()]));
}
