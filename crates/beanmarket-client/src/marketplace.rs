//! Wiring of the data layer's shared objects
//!
//! [`Marketplace`] owns one HTTP client, one session store, and the query
//! caches, and hands out query handles bound to them. Consumers receive it
//! explicitly; nothing here is global.

use beanmarket_core::{Coffee, MarketplaceConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::MarketplaceApi;
use crate::cache::QueryCache;
use crate::errors::Result;
use crate::hooks::{CatalogQuery, CoffeeSource, ListQuery, Mutation, RemoteCatalog, POSTS};
use crate::http::{HttpClient, HttpTransport, ReqwestTransport};
use crate::session::SessionStore;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};

/// The client data layer, assembled
pub struct Marketplace<T: HttpTransport = ReqwestTransport> {
    config: MarketplaceConfig,
    session: SessionStore<T>,
    api: MarketplaceApi<T>,
    coffees: QueryCache<Vec<Coffee>>,
    lists: QueryCache<Vec<serde_json::Value>>,
}

impl Marketplace<ReqwestTransport> {
    /// Production wiring: `reqwest` transport, storage per config
    pub fn from_config(config: MarketplaceConfig) -> Result<Self> {
        let http = HttpClient::from_config(&config.api)?;
        let storage = storage_for(&config);
        Self::assemble(http, storage, config)
    }
}

impl<T: HttpTransport + 'static> Marketplace<T> {
    /// Wiring over a caller-supplied transport and storage
    pub fn with_transport(transport: T, storage: Arc<dyn KeyValueStore>, config: MarketplaceConfig) -> Result<Self> {
        let http = HttpClient::new(transport, config.api.clone())?;
        Self::assemble(http, storage, config)
    }

    fn assemble(http: HttpClient<T>, storage: Arc<dyn KeyValueStore>, config: MarketplaceConfig) -> Result<Self> {
        config.validate()?;
        let session = SessionStore::new(http.clone(), storage, config.session.clone());
        let api = MarketplaceApi::authorized(&http, &session);

        info!(base_url = http.base_url().as_str(), "Marketplace client ready");
        Ok(Self {
            coffees: QueryCache::new(config.cache.clone()),
            lists: QueryCache::new(config.cache.clone()),
            config,
            session,
            api,
        })
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore<T> {
        &self.session
    }

    pub fn api(&self) -> &MarketplaceApi<T> {
        &self.api
    }

    pub fn coffee_cache(&self) -> &QueryCache<Vec<Coffee>> {
        &self.coffees
    }

    pub fn list_cache(&self) -> &QueryCache<Vec<serde_json::Value>> {
        &self.lists
    }

    /// Catalog listing over the remote `/coffees` endpoint
    pub fn catalog(&self) -> CatalogQuery {
        let source: Arc<dyn CoffeeSource> = Arc::new(RemoteCatalog::new(self.api.clone()));
        CatalogQuery::new(self.coffees.clone(), source)
    }

    /// Catalog listing over any source
    pub fn catalog_from(&self, source: Arc<dyn CoffeeSource>) -> CatalogQuery {
        CatalogQuery::new(self.coffees.clone(), source)
    }

    pub fn posts(&self) -> ListQuery<serde_json::Value> {
        ListQuery::posts(self.lists.clone(), self.api.clone())
    }

    pub fn users(&self) -> ListQuery<serde_json::Value> {
        ListQuery::users(self.lists.clone(), self.api.clone())
    }

    /// Mutation that marks cached posts stale on success
    pub fn post_mutation(&self) -> Mutation {
        Mutation::new().on(self.lists.clone()).invalidates(POSTS)
    }

    /// Start background eviction for every cache
    pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
        vec![self.coffees.spawn_sweeper(), self.lists.spawn_sweeper()]
    }
}

fn storage_for(config: &MarketplaceConfig) -> Arc<dyn KeyValueStore> {
    match &config.session.storage_path {
        Some(path) => Arc::new(FileStore::new(path.clone())),
        None => Arc::new(MemoryStore::new()),
    }
}
