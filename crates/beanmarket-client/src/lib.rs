//! BeanMarket Client
//!
//! Async data layer of the marketplace app on tokio: a retrying HTTP client,
//! a keyed query cache with stale-while-revalidate semantics, a persisted
//! session store, typed API endpoints, and query handles that bind
//! search/filter/sort parameters to the cache.
//!
//! All shared objects are constructed explicitly and passed to consumers;
//! [`Marketplace`] wires a complete set from a [`MarketplaceConfig`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod api;
pub mod cache;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod http;
pub mod logging;
pub mod marketplace;
pub mod session;
pub mod storage;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use api::MarketplaceApi;
pub use cache::{CacheStats, InvalidateQueries, QueryCache, QueryState, QueryStatus, QuerySubscription};
pub use config::{load_config, load_config_from, save_config};
pub use errors::{AuthError, ClientError, NetworkError, QueryError, Result, StorageError};
pub use hooks::{CatalogQuery, CatalogView, CoffeeSource, ListQuery, LocalCatalog, Mutation, QueryView, RemoteCatalog};
pub use http::{AttemptContext, HttpClient, HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use logging::init_logging;
pub use marketplace::Marketplace;
pub use session::{AuthToken, Credentials, FederatedProvider, Profile, Session, SessionState, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

pub use beanmarket_core::{self as core, MarketplaceConfig};
