//! Consumer-facing query handles
//!
//! A handle binds user-controlled parameters to a [`QueryCache`] entry and
//! exposes `{items, total, is_loading, is_error, error, is_fetching}`. Setters
//! only change the parameters; the cache decides whether anything is fetched.
//!
//! [`CatalogQuery`] runs the search/filter/sort pipeline over a
//! [`CoffeeSource`]. Each parameter combination is its own cache entry, so
//! flipping back to a recent view is served from cache.

use async_trait::async_trait;
use beanmarket_core::engine;
use beanmarket_core::{Coffee, FilterSpec, ListingParams, QueryKey, SortSpec};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::api::MarketplaceApi;
use crate::cache::{InvalidateQueries, QueryCache, QueryState, QuerySubscription};
use crate::errors::QueryError;
use crate::http::HttpTransport;

/// Cache namespace of coffee listing views
pub const COFFEES: &str = "coffees";
pub const POSTS: &str = "posts";
pub const USERS: &str = "users";

// ----------------------------------------------------------------------------
// Query View
// ----------------------------------------------------------------------------

/// What a consumer renders from a list query
#[derive(Debug)]
pub struct QueryView<R> {
    pub items: Arc<Vec<R>>,
    pub total: usize,
    /// Fetching with nothing to show yet
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<QueryError>,
    /// Any fetch in flight, including background revalidation
    pub is_fetching: bool,
}

impl<R> Clone for QueryView<R> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            total: self.total,
            is_loading: self.is_loading,
            is_error: self.is_error,
            error: self.error.clone(),
            is_fetching: self.is_fetching,
        }
    }
}

impl<R> From<QueryState<Vec<R>>> for QueryView<R> {
    fn from(state: QueryState<Vec<R>>) -> Self {
        let items = state.data.clone().unwrap_or_default();
        Self {
            total: items.len(),
            items,
            is_loading: state.is_loading(),
            is_error: state.is_error(),
            error: state.error,
            is_fetching: state.is_fetching,
        }
    }
}

/// View of a coffee listing
pub type CatalogView = QueryView<Coffee>;

// ----------------------------------------------------------------------------
// Coffee Sources
// ----------------------------------------------------------------------------

/// Where the unfiltered catalog comes from
#[async_trait]
pub trait CoffeeSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Coffee>, QueryError>;
}

/// Catalog held in process
#[derive(Debug, Clone, Default)]
pub struct LocalCatalog {
    coffees: Arc<Vec<Coffee>>,
}

impl LocalCatalog {
    pub fn new(coffees: Vec<Coffee>) -> Self {
        Self {
            coffees: Arc::new(coffees),
        }
    }
}

#[async_trait]
impl CoffeeSource for LocalCatalog {
    async fn load(&self) -> Result<Vec<Coffee>, QueryError> {
        Ok(self.coffees.as_ref().clone())
    }
}

/// Catalog served by the `/coffees` endpoint
pub struct RemoteCatalog<T: HttpTransport> {
    api: MarketplaceApi<T>,
}

impl<T: HttpTransport + 'static> RemoteCatalog<T> {
    pub fn new(api: MarketplaceApi<T>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<T: HttpTransport + 'static> CoffeeSource for RemoteCatalog<T> {
    async fn load(&self) -> Result<Vec<Coffee>, QueryError> {
        self.api.list_coffees().await
    }
}

// ----------------------------------------------------------------------------
// Catalog Query
// ----------------------------------------------------------------------------

/// Searchable, filterable, sortable coffee listing
pub struct CatalogQuery {
    cache: QueryCache<Vec<Coffee>>,
    source: Arc<dyn CoffeeSource>,
    params: ListingParams,
    subscription: QuerySubscription<Vec<Coffee>>,
}

impl CatalogQuery {
    /// Start with default parameters
    pub fn new(cache: QueryCache<Vec<Coffee>>, source: Arc<dyn CoffeeSource>) -> Self {
        Self::with_params(cache, source, ListingParams::default())
    }

    pub fn with_params(cache: QueryCache<Vec<Coffee>>, source: Arc<dyn CoffeeSource>, params: ListingParams) -> Self {
        let subscription = Self::subscribe(&cache, &source, &params, false);
        Self {
            cache,
            source,
            params,
            subscription,
        }
    }

    fn subscribe(
        cache: &QueryCache<Vec<Coffee>>,
        source: &Arc<dyn CoffeeSource>,
        params: &ListingParams,
        force: bool,
    ) -> QuerySubscription<Vec<Coffee>> {
        let key = params.query_key(COFFEES);
        let source = Arc::clone(source);
        let view_params = params.clone();
        let fetcher = move || async move {
            let dataset = source.load().await?;
            Ok(engine::run(dataset, &view_params))
        };

        if force {
            cache.refetch(key, fetcher)
        } else {
            cache.query(key, fetcher)
        }
    }

    fn set_params(&mut self, params: ListingParams) {
        if params == self.params {
            return;
        }
        debug!(
            search = params.search.as_str(),
            filters = params.filters.len(),
            sort = params.sort.as_str(),
            "Catalog parameters changed"
        );
        self.subscription = Self::subscribe(&self.cache, &self.source, &params, false);
        self.params = params;
    }

    pub fn params(&self) -> &ListingParams {
        &self.params
    }

    pub fn key(&self) -> &QueryKey {
        self.subscription.key()
    }

    pub fn view(&self) -> CatalogView {
        self.subscription.state().into()
    }

    /// Wait for any in-flight fetch, then return the view
    pub async fn settled(&mut self) -> CatalogView {
        self.subscription.settled().await.into()
    }

    /// Fetch the current view again regardless of freshness
    pub fn refetch(&mut self) {
        self.subscription = Self::subscribe(&self.cache, &self.source, &self.params, true);
    }

    pub fn search(&mut self, text: &str) {
        let params = ListingParams {
            search: text.to_string(),
            ..self.params.clone()
        };
        self.set_params(params);
    }

    /// Merge `filters` into the current constraints, replacing same-field ones
    pub fn apply_filters(&mut self, filters: FilterSpec) {
        let params = ListingParams {
            filters: self.params.filters.clone().merged(filters),
            ..self.params.clone()
        };
        self.set_params(params);
    }

    pub fn sort(&mut self, sort: SortSpec) {
        let params = ListingParams {
            sort,
            ..self.params.clone()
        };
        self.set_params(params);
    }

    pub fn clear_filters(&mut self) {
        let params = ListingParams {
            filters: FilterSpec::new(),
            ..self.params.clone()
        };
        self.set_params(params);
    }

    pub fn clear_search(&mut self) {
        let params = ListingParams {
            search: String::new(),
            ..self.params.clone()
        };
        self.set_params(params);
    }

    /// Back to default search, filters and sort in one step
    pub fn reset(&mut self) {
        self.set_params(ListingParams::default());
    }
}

impl fmt::Debug for CatalogQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogQuery")
            .field("params", &self.params)
            .field("key", self.subscription.key())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// List Query
// ----------------------------------------------------------------------------

/// Produces a fresh fetch of a list
pub type Loader<R> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<R>, QueryError>> + Send + Sync>;

/// Cached list without user parameters, e.g. posts or users
pub struct ListQuery<R: Send + Sync + 'static> {
    cache: QueryCache<Vec<R>>,
    loader: Loader<R>,
    subscription: QuerySubscription<Vec<R>>,
}

impl<R: Send + Sync + 'static> ListQuery<R> {
    pub fn new(cache: QueryCache<Vec<R>>, key: QueryKey, loader: Loader<R>) -> Self {
        let fetch = Arc::clone(&loader);
        let subscription = cache.query(key, move || fetch());
        Self {
            cache,
            loader,
            subscription,
        }
    }

    pub fn key(&self) -> &QueryKey {
        self.subscription.key()
    }

    pub fn view(&self) -> QueryView<R> {
        self.subscription.state().into()
    }

    pub async fn settled(&mut self) -> QueryView<R> {
        self.subscription.settled().await.into()
    }

    /// Look the key up again; fetches only if the entry went stale
    pub fn refresh(&mut self) {
        let fetch = Arc::clone(&self.loader);
        self.subscription = self.cache.query(self.key().clone(), move || fetch());
    }

    pub fn refetch(&mut self) {
        let fetch = Arc::clone(&self.loader);
        self.subscription = self.cache.refetch(self.key().clone(), move || fetch());
    }
}

impl ListQuery<serde_json::Value> {
    /// Marketplace posts
    pub fn posts<T: HttpTransport + 'static>(cache: QueryCache<Vec<serde_json::Value>>, api: MarketplaceApi<T>) -> Self {
        let loader: Loader<serde_json::Value> = Arc::new(move || {
            let api = api.clone();
            async move { api.list_posts().await }.boxed()
        });
        Self::new(cache, QueryKey::new(POSTS), loader)
    }

    /// Marketplace users
    pub fn users<T: HttpTransport + 'static>(cache: QueryCache<Vec<serde_json::Value>>, api: MarketplaceApi<T>) -> Self {
        let loader: Loader<serde_json::Value> = Arc::new(move || {
            let api = api.clone();
            async move { api.list_users().await }.boxed()
        });
        Self::new(cache, QueryKey::new(USERS), loader)
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for ListQuery<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListQuery").field("key", self.subscription.key()).finish()
    }
}

// ----------------------------------------------------------------------------
// Mutations
// ----------------------------------------------------------------------------

/// Runs a write and invalidates the namespaces it affects
#[derive(Clone, Default)]
pub struct Mutation {
    caches: Vec<Arc<dyn InvalidateQueries>>,
    namespaces: Vec<String>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate in `cache` after success
    pub fn on<C: InvalidateQueries + 'static>(mut self, cache: C) -> Self {
        self.caches.push(Arc::new(cache));
        self
    }

    /// Invalidate keys under `namespace` after success
    pub fn invalidates(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    /// Run `operation`; on success mark every listed namespace stale
    ///
    /// Nothing is invalidated when the operation fails.
    pub async fn run<F, Fut, V>(&self, operation: F) -> Result<V, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: core::future::Future<Output = Result<V, QueryError>>,
    {
        let value = operation().await?;
        let marked: usize = self
            .namespaces
            .iter()
            .flat_map(|ns| self.caches.iter().map(move |cache| cache.invalidate_prefix(ns)))
            .sum();
        debug!(namespaces = ?self.namespaces, marked, "Mutation succeeded");
        Ok(value)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("caches", &self.caches.len())
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryStatus;
    use beanmarket_core::{CacheConfig, Filter, Timestamp};

    fn coffee(id: &str, region: &str, rating: f32) -> Coffee {
        Coffee {
            id: id.to_string(),
            name: format!("Lot {id}"),
            origin: "Ethiopia".to_string(),
            region: region.to_string(),
            processing: "Washed".to_string(),
            producer: "Coop".to_string(),
            certification: None,
            variety: None,
            flavor_notes: Default::default(),
            price: None,
            rating,
            listed_at: Timestamp::new(0),
        }
    }

    fn catalog() -> CatalogQuery {
        let source = LocalCatalog::new(vec![
            coffee("a", "Guji", 4.1),
            coffee("b", "Sidamo", 4.8),
            coffee("c", "Guji", 4.6),
        ]);
        CatalogQuery::new(QueryCache::new(CacheConfig::testing()), Arc::new(source))
    }

    #[tokio::test]
    async fn test_setters_change_key_and_view() {
        let mut query = catalog();
        assert_eq!(query.settled().await.total, 3);

        query.apply_filters(FilterSpec::new().with(Filter::Region("Guji".into())));
        query.sort(SortSpec::RatingHighLow);
        let view = query.settled().await;
        let ids: Vec<_> = view.items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c", "a"]);
        assert_eq!(
            query.key().as_str(),
            r#"["coffees",{"filters":{"region":"Guji"},"sort":"rating"}]"#
        );

        query.clear_filters();
        assert_eq!(query.settled().await.total, 3);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_only_on_success() {
        let cache: QueryCache<Vec<u32>> = QueryCache::new(CacheConfig::testing());
        let mut sub = cache.query(QueryKey::new(POSTS), || async { Ok(vec![1]) });
        sub.settled().await;

        let mutation = Mutation::new().on(cache.clone()).invalidates(POSTS);
        let failed: Result<(), QueryError> = mutation
            .run(|| async {
                Err(QueryError::Aborted {
                    reason: "rejected".into(),
                })
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(sub.state().status, QueryStatus::Fresh);

        mutation.run(|| async { Ok(()) }).await.unwrap();
        assert_eq!(sub.state().status, QueryStatus::Stale);
    }
}
