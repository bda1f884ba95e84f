//! Search, filter, and sort over coffee listings
//!
//! The pipeline order is fixed: search, then filter, then sort. Search and
//! filter only shrink the set, so sorting last compares the fewest records.

pub mod filter;
pub mod search;
pub mod sort;

use serde::{Deserialize, Serialize};

use crate::catalog::Coffee;
use crate::query_key::QueryKey;

pub use filter::{facets, filter, Facets, Filter, FilterField, FilterSpec};
pub use search::{search, SearchQuery};
pub use sort::{sort, SortSpec};

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// Run the full pipeline over a borrowed dataset
pub fn pipeline(dataset: &[Coffee], query: &str, filters: &FilterSpec, order: SortSpec) -> Vec<Coffee> {
    run(dataset.to_vec(), &ListingParams {
        search: query.to_string(),
        filters: filters.clone(),
        sort: order,
    })
}

/// Run the full pipeline over an owned dataset
pub fn run(dataset: Vec<Coffee>, params: &ListingParams) -> Vec<Coffee> {
    let total = dataset.len();
    let matched = search(dataset, &SearchQuery::new(&params.search));
    let after_search = matched.len();
    let kept = filter(matched, &params.filters);
    let after_filter = kept.len();
    let ordered = sort(kept, params.sort);

    tracing::debug!(
        total,
        after_search,
        after_filter,
        sort = params.sort.as_str(),
        "Listing pipeline complete"
    );
    ordered
}

// ----------------------------------------------------------------------------
// Listing Parameters
// ----------------------------------------------------------------------------

/// The user-controlled inputs of a listing view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingParams {
    pub search: String,
    pub filters: FilterSpec,
    pub sort: SortSpec,
}

impl ListingParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the params would pass the dataset through unchanged
    pub fn is_identity(&self) -> bool {
        SearchQuery::new(&self.search).is_empty() && self.filters.is_empty() && self.sort.is_unsorted()
    }

    /// Cache key for these params under `namespace`
    ///
    /// Search text is normalized first, so `" Kenya"` and `"kenya"` share an
    /// entry. Defaults are omitted from the key.
    pub fn query_key(&self, namespace: &str) -> QueryKey {
        let search = SearchQuery::new(&self.search);
        let mut builder = QueryKey::builder(namespace);
        if !search.is_empty() {
            builder = builder.param("search", search.as_str());
        }
        if !self.filters.is_empty() {
            builder = builder.param("filters", self.filters.to_param());
        }
        if !self.sort.is_unsorted() {
            builder = builder.param("sort", self.sort.as_str());
        }
        builder.build()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
