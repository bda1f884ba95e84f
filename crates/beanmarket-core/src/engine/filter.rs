//! Declarative listing filters
//!
//! A [`FilterSpec`] holds at most one constraint per field. All constraints
//! must hold for a record to pass; an empty spec passes everything.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Coffee;
use crate::price::Price;

// ----------------------------------------------------------------------------
// Filter Fields and Constraints
// ----------------------------------------------------------------------------

/// Fields a filter can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterField {
    Origin,
    Region,
    Processing,
    Producer,
    Certification,
    Variety,
    MinRating,
    MaxPrice,
}

impl FilterField {
    /// Parameter name used in query keys
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::Origin => "origin",
            FilterField::Region => "region",
            FilterField::Processing => "processing",
            FilterField::Producer => "producer",
            FilterField::Certification => "certification",
            FilterField::Variety => "variety",
            FilterField::MinRating => "minRating",
            FilterField::MaxPrice => "maxPrice",
        }
    }
}

/// A single constraint
///
/// Text constraints compare for equality ignoring ASCII case. `MinRating`
/// passes at or above the threshold, `MaxPrice` at or below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum Filter {
    Origin(String),
    Region(String),
    Processing(String),
    Producer(String),
    Certification(String),
    Variety(String),
    MinRating(f32),
    MaxPrice(Price),
}

impl Filter {
    pub fn field(&self) -> FilterField {
        match self {
            Filter::Origin(_) => FilterField::Origin,
            Filter::Region(_) => FilterField::Region,
            Filter::Processing(_) => FilterField::Processing,
            Filter::Producer(_) => FilterField::Producer,
            Filter::Certification(_) => FilterField::Certification,
            Filter::Variety(_) => FilterField::Variety,
            Filter::MinRating(_) => FilterField::MinRating,
            Filter::MaxPrice(_) => FilterField::MaxPrice,
        }
    }

    pub fn matches(&self, coffee: &Coffee) -> bool {
        match self {
            Filter::Origin(want) => want.eq_ignore_ascii_case(&coffee.origin),
            Filter::Region(want) => want.eq_ignore_ascii_case(&coffee.region),
            Filter::Processing(want) => want.eq_ignore_ascii_case(&coffee.processing),
            Filter::Producer(want) => want.eq_ignore_ascii_case(&coffee.producer),
            Filter::Certification(want) => coffee
                .certification
                .as_deref()
                .is_some_and(|c| want.eq_ignore_ascii_case(c)),
            Filter::Variety(want) => coffee
                .variety
                .as_deref()
                .is_some_and(|v| want.eq_ignore_ascii_case(v)),
            Filter::MinRating(min) => coffee.rating >= *min,
            // An unpriced lot cannot be shown to be under the ceiling
            Filter::MaxPrice(max) => coffee
                .price
                .is_some_and(|price| price.amount_minor <= max.amount_minor),
        }
    }

    fn param_value(&self) -> serde_json::Value {
        match self {
            Filter::Origin(v)
            | Filter::Region(v)
            | Filter::Processing(v)
            | Filter::Producer(v)
            | Filter::Certification(v)
            | Filter::Variety(v) => serde_json::Value::String(v.clone()),
            Filter::MinRating(min) => serde_json::json!(min),
            Filter::MaxPrice(max) => serde_json::json!(max.amount_minor),
        }
    }
}

// ----------------------------------------------------------------------------
// Filter Spec
// ----------------------------------------------------------------------------

/// Conjunction of constraints keyed by field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    entries: BTreeMap<FilterField, Filter>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, filter: Filter) -> Self {
        self.insert(filter);
        self
    }

    /// Set a constraint, returning the one it replaced
    pub fn insert(&mut self, filter: Filter) -> Option<Filter> {
        self.entries.insert(filter.field(), filter)
    }

    pub fn remove(&mut self, field: FilterField) -> Option<Filter> {
        self.entries.remove(&field)
    }

    pub fn get(&self, field: FilterField) -> Option<&Filter> {
        self.entries.get(&field)
    }

    /// Shallow merge: constraints in `other` replace those on the same field
    pub fn merge(&mut self, other: FilterSpec) {
        self.entries.extend(other.entries);
    }

    /// Non-mutating merge
    pub fn merged(mut self, other: FilterSpec) -> Self {
        self.merge(other);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.entries.values()
    }

    pub fn matches(&self, coffee: &Coffee) -> bool {
        self.entries.values().all(|filter| filter.matches(coffee))
    }

    /// `{ field: value }` object for query key parameters
    pub fn to_param(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(field, filter)| (field.as_str().to_string(), filter.param_value()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<Filter> for FilterSpec {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        let mut spec = FilterSpec::new();
        for filter in iter {
            spec.insert(filter);
        }
        spec
    }
}

/// Keep only the records satisfying every constraint in `spec`
pub fn filter(mut records: Vec<Coffee>, spec: &FilterSpec) -> Vec<Coffee> {
    if !spec.is_empty() {
        records.retain(|coffee| spec.matches(coffee));
    }
    records
}

// ----------------------------------------------------------------------------
// Facets
// ----------------------------------------------------------------------------

/// Distinct values per text field, for populating filter pickers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facets {
    pub origins: Vec<String>,
    pub regions: Vec<String>,
    pub processing: Vec<String>,
    pub producers: Vec<String>,
    pub certifications: Vec<String>,
    pub varieties: Vec<String>,
}

/// Collect facets; values are de-duplicated ignoring case and sorted
pub fn facets(records: &[Coffee]) -> Facets {
    fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out: Vec<String> = values
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .filter(|v| seen.insert(v.to_ascii_lowercase()))
            .map(str::to_string)
            .collect();
        out.sort_by_key(|v| v.to_ascii_lowercase());
        out
    }

    Facets {
        origins: distinct(records.iter().map(|c| c.origin.as_str())),
        regions: distinct(records.iter().map(|c| c.region.as_str())),
        processing: distinct(records.iter().map(|c| c.processing.as_str())),
        producers: distinct(records.iter().map(|c| c.producer.as_str())),
        certifications: distinct(records.iter().filter_map(|c| c.certification.as_deref())),
        varieties: distinct(records.iter().filter_map(|c| c.variety.as_deref())),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
