//! Property-based tests for the query cache
//!
//! These tests verify single-flight fetching and prefix invalidation over
//! arbitrary lookup sequences.

use beanmarket_client::{QueryCache, QueryError, QueryStatus, QuerySubscription};
use beanmarket_core::{CacheConfig, ManualTimeSource, QueryKey, Timestamp};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const NAMESPACES: [&str; 3] = ["coffees", "posts", "users"];

type FetchLog = Arc<Mutex<HashMap<QueryKey, usize>>>;

fn arb_key() -> impl Strategy<Value = QueryKey> {
    (prop::sample::select(NAMESPACES.to_vec()), 0u8..3)
        .prop_map(|(namespace, page)| QueryKey::builder(namespace).param("page", page).build())
}

fn arb_lookups() -> impl Strategy<Value = Vec<QueryKey>> {
    prop::collection::vec(arb_key(), 1..24)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn cache() -> QueryCache<String> {
    let clock = ManualTimeSource::starting_at(Timestamp::new(1_700_000_000_000));
    QueryCache::with_time_source(CacheConfig::testing(), Arc::new(clock))
}

/// Look `key` up, recording each fetch and answering with the key itself
fn lookup(cache: &QueryCache<String>, log: &FetchLog, key: &QueryKey) -> QuerySubscription<String> {
    let log = Arc::clone(log);
    let fetched = key.clone();
    cache.query(key.clone(), move || async move {
        *log.lock().unwrap().entry(fetched.clone()).or_default() += 1;
        Ok::<_, QueryError>(fetched.as_str().to_string())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Lookups issued before any fetch completes share one fetch per key
    #[test]
    fn prop_one_fetch_per_distinct_key(keys in arb_lookups()) {
        runtime().block_on(async {
            let cache = cache();
            let log = FetchLog::default();

            let mut subscriptions: Vec<_> = keys.iter().map(|key| lookup(&cache, &log, key)).collect();
            for subscription in &mut subscriptions {
                let state = subscription.settled().await;
                prop_assert_eq!(state.data().map(String::as_str), Some(subscription.key().as_str()));
            }

            let distinct: HashSet<&QueryKey> = keys.iter().collect();
            prop_assert_eq!(cache.stats().fetches as usize, distinct.len());
            prop_assert!(log.lock().unwrap().values().all(|count| *count == 1));

            // everything is fresh, so a second pass is served from cache
            for key in &keys {
                prop_assert_eq!(lookup(&cache, &log, key).state().status, QueryStatus::Fresh);
            }
            prop_assert_eq!(cache.stats().fetches as usize, distinct.len());
            Ok(())
        })?;
    }

    /// Invalidating a namespace refetches exactly the keys under it
    #[test]
    fn prop_invalidation_is_scoped_to_namespace(
        keys in arb_lookups(),
        target in prop::sample::select(NAMESPACES.to_vec()),
    ) {
        runtime().block_on(async {
            let cache = cache();
            let log = FetchLog::default();
            for key in &keys {
                lookup(&cache, &log, key).settled().await;
            }

            let distinct: HashSet<&QueryKey> = keys.iter().collect();
            let affected = distinct.iter().filter(|key| key.namespace() == target).count();
            prop_assert_eq!(cache.invalidate(target), affected);

            for key in &distinct {
                lookup(&cache, &log, key).settled().await;
            }
            let log = log.lock().unwrap();
            for key in &distinct {
                let expected = if key.namespace() == target { 2 } else { 1 };
                prop_assert_eq!(log.get(*key).copied(), Some(expected));
            }
            Ok(())
        })?;
    }
}
