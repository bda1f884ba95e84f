//! Keyed query cache with stale-while-revalidate semantics
//!
//! Each [`QueryKey`] owns one slot holding the latest [`QueryState`] snapshot.
//! Snapshots are published whole through a `watch` channel, so readers never
//! observe a half-updated entry.
//!
//! Entry lifecycle:
//!
//! ```text
//! Idle --access--> Loading --ok--> Fresh --ttl elapsed / invalidate--> Stale
//!                     |                                                  |
//!                     +--err--> Error --access--> Loading <--access------+
//! ```
//!
//! At most one fetch per key is in flight. Fetches run on spawned tasks and
//! their results are stored even when every subscriber has gone away, but
//! never into a slot created after the fetch started. A panicking fetcher
//! settles its entry as [`QueryError::Aborted`].

use beanmarket_core::{CacheConfig, QueryKey, SystemTimeSource, TimeSource, Timestamp};
use core::future::Future;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use dashmap::DashMap;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::QueryError;

// ----------------------------------------------------------------------------
// Query State
// ----------------------------------------------------------------------------

/// Position of an entry in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Idle,
    Loading,
    Fresh,
    Stale,
    Error,
}

/// Immutable snapshot of one cache entry
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    /// Last successful result; kept across errors and refetches
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub fetched_at: Option<Timestamp>,
    /// When `Fresh` data turns stale
    pub stale_at: Option<Timestamp>,
    pub is_fetching: bool,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            stale_at: self.stale_at,
            is_fetching: self.is_fetching,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            stale_at: None,
            is_fetching: false,
        }
    }
}

impl<T> QueryState<T> {
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// Fetching with nothing to show yet
    pub fn is_loading(&self) -> bool {
        self.is_fetching && self.data.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Snapshot as seen at `now`: `Fresh` past its stale time reads as `Stale`
    pub fn at(mut self, now: Timestamp) -> Self {
        if self.status == QueryStatus::Fresh && self.stale_at.is_some_and(|at| now > at) {
            self.status = QueryStatus::Stale;
        }
        self
    }

    fn loading_from(previous: &Self) -> Self {
        Self {
            status: QueryStatus::Loading,
            is_fetching: true,
            ..previous.clone()
        }
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub lookups: u64,
    /// Lookups answered with fresh data
    pub hits: u64,
    /// Lookups answered with stale data while revalidating
    pub stale_hits: u64,
    /// Lookups with nothing cached
    pub misses: u64,
    pub fetches: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------------
// Cache Internals
// ----------------------------------------------------------------------------

struct Slot<T> {
    /// Distinguishes this slot from earlier ones under the same key
    id: u64,
    /// Tag of the fetch whose result this slot accepts
    generation: u64,
    state: watch::Sender<QueryState<T>>,
    subscribers: usize,
    /// Last lookup or last subscriber drop
    last_access: Timestamp,
    /// Invalidated while a fetch was in flight
    invalidated: bool,
}

impl<T> Slot<T> {
    fn new(id: u64, now: Timestamp) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            id,
            generation: 0,
            state,
            subscribers: 0,
            last_access: now,
            invalidated: false,
        }
    }

    fn snapshot(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }
}

struct CacheInner<T> {
    entries: DashMap<QueryKey, Slot<T>>,
    config: CacheConfig,
    time_source: Arc<dyn TimeSource>,
    counters: Counters,
    /// Source of slot ids and fetch generations
    next_tag: AtomicU64,
}

struct Acquired<T> {
    receiver: watch::Receiver<QueryState<T>>,
    slot_id: u64,
    lookup: Lookup,
}

enum Lookup {
    /// Serve what is cached
    Cached,
    /// Start a fetch tagged with this generation
    Fetch(u64),
}

impl<T: Send + Sync + 'static> CacheInner<T> {
    fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    /// Register a subscriber and decide whether a fetch must start
    ///
    /// The decision and the transition to `Loading` happen under the entry's
    /// shard lock, which is what makes the fetch single-flight.
    fn acquire(&self, key: &QueryKey, ttl: Duration, force: bool) -> Acquired<T> {
        let now = self.now();
        Counters::bump(&self.counters.lookups);

        let mut slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Slot::new(self.next_tag(), now));
        slot.subscribers += 1;
        slot.last_access = now;

        let state = slot.snapshot();
        let expired = state
            .fetched_at
            .is_some_and(|fetched| now.duration_since(fetched) > ttl);

        match (&state.data, state.status) {
            (None, _) => Counters::bump(&self.counters.misses),
            (Some(_), QueryStatus::Fresh) if !expired => Counters::bump(&self.counters.hits),
            (Some(_), _) => Counters::bump(&self.counters.stale_hits),
        }

        let wants_fetch = force
            || match state.status {
                QueryStatus::Idle | QueryStatus::Stale | QueryStatus::Error => true,
                QueryStatus::Fresh => expired,
                QueryStatus::Loading => false,
            };

        let lookup = if wants_fetch && !state.is_fetching {
            slot.invalidated = false;
            slot.generation = self.next_tag();
            slot.state.send_replace(QueryState::loading_from(&state));
            Lookup::Fetch(slot.generation)
        } else {
            Lookup::Cached
        };

        Acquired {
            receiver: slot.state.subscribe(),
            slot_id: slot.id,
            lookup,
        }
    }

    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn release(&self, key: &QueryKey, slot_id: u64) {
        let now = self.now();
        if let Some(mut slot) = self.entries.get_mut(key).filter(|slot| slot.id == slot_id) {
            slot.subscribers = slot.subscribers.saturating_sub(1);
            slot.last_access = now;
        }
    }

    fn complete(&self, key: &QueryKey, generation: u64, result: Result<T, QueryError>, ttl: Duration) {
        let now = self.now();
        let Some(mut slot) = self.entries.get_mut(key) else {
            debug!(key = %key.fingerprint(), "Fetch finished for a removed entry");
            return;
        };
        if slot.generation != generation {
            debug!(key = %key.fingerprint(), "Fetch finished for a replaced entry, result dropped");
            return;
        }

        let previous = slot.snapshot();
        let next = match result {
            Ok(data) => QueryState {
                status: if slot.invalidated {
                    QueryStatus::Stale
                } else {
                    QueryStatus::Fresh
                },
                data: Some(Arc::new(data)),
                error: None,
                fetched_at: Some(now),
                stale_at: Some(now + ttl),
                is_fetching: false,
            },
            Err(error) => {
                warn!(key = %key.fingerprint(), namespace = key.namespace(), "Query fetch failed: {}", error);
                QueryState {
                    status: QueryStatus::Error,
                    error: Some(error),
                    is_fetching: false,
                    ..previous
                }
            }
        };

        slot.invalidated = false;
        slot.state.send_replace(next);
    }

    fn evict_expired(&self) -> usize {
        let now = self.now();
        let gc_time = self.config.gc_time();
        let before = self.entries.len();

        self.entries.retain(|_, slot| {
            slot.subscribers > 0
                || slot.state.borrow().is_fetching
                || now.duration_since(slot.last_access) <= gc_time
        });

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, remaining = self.entries.len(), "Evicted idle query entries");
        }
        evicted
    }
}

// ----------------------------------------------------------------------------
// Query Cache
// ----------------------------------------------------------------------------

/// Shared cache of query results of type `T`
///
/// Cloning is cheap; clones share the same entries. Fetch methods spawn onto
/// the ambient tokio runtime.
pub struct QueryCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> QueryCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_time_source(config, Arc::new(SystemTimeSource::new()))
    }

    pub fn with_time_source(config: CacheConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                config,
                time_source,
                counters: Counters::default(),
                next_tag: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Subscribe to `key`, fetching when nothing fresh is cached
    ///
    /// Returns immediately. Cached data, fresh or stale, is in the returned
    /// subscription's first snapshot; a needed fetch runs in the background
    /// and concurrent callers share it.
    pub fn get_or_fetch<F, Fut>(&self, key: QueryKey, fetcher: F, ttl: Duration) -> QuerySubscription<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.lookup(key, fetcher, ttl, false)
    }

    /// [`get_or_fetch`](Self::get_or_fetch) with the configured stale time
    pub fn query<F, Fut>(&self, key: QueryKey, fetcher: F) -> QuerySubscription<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let ttl = self.inner.config.stale_time();
        self.lookup(key, fetcher, ttl, false)
    }

    /// Fetch regardless of freshness; joins a fetch already in flight
    pub fn refetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> QuerySubscription<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let ttl = self.inner.config.stale_time();
        self.lookup(key, fetcher, ttl, true)
    }

    fn lookup<F, Fut>(&self, key: QueryKey, fetcher: F, ttl: Duration, force: bool) -> QuerySubscription<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let Acquired {
            receiver,
            slot_id,
            lookup,
        } = self.inner.acquire(&key, ttl, force);

        if let Lookup::Fetch(generation) = lookup {
            Counters::bump(&self.inner.counters.fetches);
            debug!(key = %key.fingerprint(), namespace = key.namespace(), forced = force, "Starting query fetch");

            let inner = Arc::clone(&self.inner);
            let fetch_key = key.clone();
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(async move { fetcher().await }).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(QueryError::Aborted {
                        reason: "fetcher panicked".to_string(),
                    }),
                };
                inner.complete(&fetch_key, generation, result, ttl);
            });
        }

        QuerySubscription {
            key,
            slot_id,
            receiver,
            cache: Arc::downgrade(&self.inner),
            time_source: Arc::clone(&self.inner.time_source),
        }
    }

    /// Current snapshot without registering interest or fetching
    pub fn peek(&self, key: &QueryKey) -> Option<QueryState<T>> {
        let now = self.inner.now();
        self.inner.entries.get(key).map(|slot| slot.snapshot().at(now))
    }

    /// Mark every entry whose key matches `prefix` as stale
    ///
    /// `prefix` is a namespace (`"coffees"`) or a prefix of the serialized
    /// key. Returns the number of entries marked.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut marked = 0;
        for mut slot in self.inner.entries.iter_mut() {
            if slot.key().matches_prefix(prefix) {
                Self::mark_stale(&mut slot);
                marked += 1;
            }
        }
        info!(prefix, marked, "Invalidated queries");
        marked
    }

    /// Mark one entry stale
    pub fn invalidate_key(&self, key: &QueryKey) -> bool {
        match self.inner.entries.get_mut(key) {
            Some(mut slot) => {
                Self::mark_stale(&mut slot);
                true
            }
            None => false,
        }
    }

    fn mark_stale(slot: &mut Slot<T>) {
        let state = slot.snapshot();
        if state.is_fetching {
            slot.invalidated = true;
        } else if state.status == QueryStatus::Fresh {
            slot.state.send_replace(QueryState {
                status: QueryStatus::Stale,
                ..state
            });
        }
    }

    /// Drop entries unobserved for longer than the hard expiry window
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Run [`evict_expired`](Self::evict_expired) periodically
    ///
    /// The task ends once every handle to the cache is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let cache: Weak<CacheInner<T>> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = cache.upgrade() else {
                    debug!("Query cache dropped, stopping sweeper");
                    break;
                };
                inner.evict_expired();
            }
        })
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            entries: self.inner.entries.len(),
            lookups: c.lookups.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Invalidation without the value type, for code touching several caches
pub trait InvalidateQueries: Send + Sync {
    fn invalidate_prefix(&self, prefix: &str) -> usize;
}

impl<T: Send + Sync + 'static> InvalidateQueries for QueryCache<T> {
    fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate(prefix)
    }
}

impl<T> fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.inner.entries.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Live view of one cache entry
///
/// Counts as a subscriber until dropped; entries with subscribers are never
/// evicted.
pub struct QuerySubscription<T: Send + Sync + 'static> {
    key: QueryKey,
    slot_id: u64,
    receiver: watch::Receiver<QueryState<T>>,
    cache: Weak<CacheInner<T>>,
    time_source: Arc<dyn TimeSource>,
}

impl<T: Send + Sync + 'static> QuerySubscription<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest snapshot
    pub fn state(&self) -> QueryState<T> {
        let snapshot = self.receiver.borrow().clone();
        snapshot.at(self.time_source.now())
    }

    /// Wait for the next snapshot; `false` once the entry is gone
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    /// Wait until no fetch is in flight and return that snapshot
    pub async fn settled(&mut self) -> QueryState<T> {
        loop {
            if !self.receiver.borrow_and_update().is_fetching {
                break;
            }
            if self.receiver.changed().await.is_err() {
                break;
            }
        }
        self.state()
    }
}

impl<T: Send + Sync + 'static> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.cache.upgrade() {
            inner.release(&self.key, self.slot_id);
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for QuerySubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription").field("key", &self.key).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use beanmarket_core::ManualTimeSource;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> (QueryCache<u32>, ManualTimeSource) {
        let clock = ManualTimeSource::starting_at(Timestamp::new(1_000_000));
        let cache = QueryCache::with_time_source(CacheConfig::testing(), Arc::new(clock.clone()));
        (cache, clock)
    }

    #[tokio::test]
    async fn test_error_keeps_previous_data() {
        let (cache, clock) = cache();
        let key = QueryKey::new("coffees");

        let mut sub = cache.get_or_fetch(key.clone(), || async { Ok(7) }, Duration::from_secs(1));
        assert_eq!(sub.settled().await.data(), Some(&7));

        clock.advance(Duration::from_secs(2));
        let mut sub = cache.get_or_fetch(
            key.clone(),
            || async {
                Err(QueryError::Aborted {
                    reason: "offline".into(),
                })
            },
            Duration::from_secs(1),
        );
        let state = sub.settled().await;
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.data(), Some(&7));
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_by_namespace() {
        let (cache, _clock) = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let coffees = QueryKey::builder("coffees").param("search", "kenya").build();
        let posts = QueryKey::new("posts");

        for key in [coffees.clone(), posts.clone()] {
            let calls = Arc::clone(&calls);
            let mut sub = cache.query(key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            });
            sub.settled().await;
        }

        assert_eq!(cache.invalidate("coffees"), 1);
        assert_eq!(cache.peek(&coffees).map(|s| s.status), Some(QueryStatus::Stale));
        assert_eq!(cache.peek(&posts).map(|s| s.status), Some(QueryStatus::Fresh));
    }

    #[tokio::test]
    async fn test_unobserved_entries_are_evicted() {
        let (cache, clock) = cache();
        let kept = cache.query(QueryKey::new("users"), || async { Ok(1) });
        {
            let mut gone = cache.query(QueryKey::new("posts"), || async { Ok(2) });
            gone.settled().await;
        }

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.peek(&QueryKey::new("posts")).is_none());
        assert!(cache.peek(kept.key()).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }
}
