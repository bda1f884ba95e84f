//! BeanMarket Core
//!
//! Pure building blocks of the marketplace client's data layer: listing
//! records and their normalization, structured prices, deterministic query
//! keys, the search/filter/sort engine, configuration, and the time source
//! abstraction. Nothing in this crate performs I/O; the async pieces live in
//! `beanmarket-client`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod price;
pub mod query_key;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use catalog::{normalize_coffees, normalize_listing, Coffee, CoffeeRecord};
pub use config::{ApiConfig, CacheConfig, LoggingConfig, MarketplaceConfig, SessionConfig};
pub use engine::{pipeline, Filter, FilterField, FilterSpec, ListingParams, SearchQuery, SortSpec};
pub use errors::{ConfigError, CoreError, CoreResult, DataError, Result};
pub use price::{Currency, Price};
pub use query_key::{QueryKey, QueryKeyBuilder};
pub use types::{ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
