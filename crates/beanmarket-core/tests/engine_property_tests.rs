//! Property-based tests for query keys and the listing pipeline
//!
//! These tests verify key determinism, filter identity and intersection, and
//! sort stability over arbitrary catalogs.

use beanmarket_core::engine::{self, Filter, FilterSpec, SearchQuery, SortSpec};
use beanmarket_core::{Coffee, Currency, ListingParams, Price, QueryKey, Timestamp};
use proptest::prelude::*;
use serde_json::json;

/// Small vocabularies so generated records collide on fields and ties happen
fn arb_word() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Guji", "Sidamo", "Huila", "Nyeri", "Washed", "Natural", "Honey"])
        .prop_map(str::to_string)
}

fn arb_coffee() -> impl Strategy<Value = Coffee> {
    (
        0u32..1000,
        arb_word(),
        arb_word(),
        arb_word(),
        prop::option::of(1_000i64..6_000),
        0u8..=50,
        0u64..10,
    )
        .prop_map(|(n, name, region, processing, price, rating, listed)| Coffee {
            id: format!("coffee-{n:03}"),
            name,
            origin: "Ethiopia".to_string(),
            region,
            processing,
            producer: "Coop".to_string(),
            certification: None,
            variety: None,
            flavor_notes: Default::default(),
            price: price.map(|minor| Price::new(minor, Currency::Eur)),
            rating: f32::from(rating) / 10.0,
            listed_at: Timestamp::from_secs(listed),
        })
}

fn arb_catalog() -> impl Strategy<Value = Vec<Coffee>> {
    prop::collection::vec(arb_coffee(), 0..40)
}

fn arb_sort() -> impl Strategy<Value = SortSpec> {
    prop::sample::select(vec![
        SortSpec::Unsorted,
        SortSpec::PriceLowHigh,
        SortSpec::PriceHighLow,
        SortSpec::RatingHighLow,
        SortSpec::Name,
        SortSpec::Newest,
    ])
}

proptest! {
    /// Property: parameter insertion order never changes the key
    #[test]
    fn query_key_ignores_param_order(
        params in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9 ]{0,12}", 0..8)
    ) {
        let forward = params
            .iter()
            .fold(QueryKey::builder("coffees"), |b, (k, v)| b.param(k.clone(), v.clone()))
            .build();
        let backward = params
            .iter()
            .rev()
            .fold(QueryKey::builder("coffees"), |b, (k, v)| b.param(k.clone(), v.clone()))
            .build();

        prop_assert_eq!(forward.as_str(), backward.as_str());
        prop_assert_eq!(forward.fingerprint(), backward.fingerprint());
    }

    /// Property: nested objects are canonicalized too
    #[test]
    fn query_key_canonicalizes_nested_objects(region in "[A-Za-z]{1,10}", rating in 0u8..=50) {
        let a = QueryKey::builder("coffees")
            .param("filters", json!({ "region": region.clone(), "minRating": rating }))
            .build();
        let b = QueryKey::builder("coffees")
            .param("filters", json!({ "minRating": rating, "region": region }))
            .build();
        prop_assert_eq!(a, b);
    }

    /// Property: equal listing params always map to the same key
    #[test]
    fn listing_params_key_is_deterministic(search in "[ A-Za-z]{0,12}", sort in arb_sort()) {
        let params = ListingParams {
            search: search.clone(),
            filters: FilterSpec::new().with(Filter::MinRating(4.0)),
            sort,
        };
        let again = ListingParams {
            search: search.to_lowercase(),
            ..params.clone()
        };
        prop_assert_eq!(params.query_key("coffees"), again.query_key("coffees"));
    }

    /// Property: an empty filter spec returns the input unchanged
    #[test]
    fn empty_filter_is_identity(catalog in arb_catalog()) {
        prop_assert_eq!(engine::filter(catalog.clone(), &FilterSpec::new()), catalog);
    }

    /// Property: pipeline output is the intersection of search and filter
    #[test]
    fn pipeline_is_intersection(
        catalog in arb_catalog(),
        query in arb_word(),
        region in arb_word(),
        sort in arb_sort(),
    ) {
        let filters = FilterSpec::new().with(Filter::Region(region));
        let out = engine::pipeline(&catalog, &query, &filters, sort);

        let search = SearchQuery::new(&query);
        let expected = catalog
            .iter()
            .filter(|c| search.matches(c) && filters.matches(c))
            .count();
        prop_assert_eq!(out.len(), expected);
        for coffee in &out {
            prop_assert!(search.matches(coffee));
            prop_assert!(filters.matches(coffee));
        }
    }

    /// Property: sorting is stable and idempotent
    #[test]
    fn sort_is_stable(catalog in arb_catalog(), sort in arb_sort()) {
        let once = engine::sort(catalog.clone(), sort);
        let twice = engine::sort(once.clone(), sort);
        prop_assert_eq!(&once, &twice);

        // Equal elements keep their relative input order
        for pair in once.windows(2) {
            if sort.compare(&pair[0], &pair[1]) == Some(core::cmp::Ordering::Equal) {
                let first = catalog.iter().position(|c| c == &pair[0]);
                let second = catalog.iter().rposition(|c| c == &pair[1]);
                prop_assert!(first <= second);
            }
        }
    }
}
