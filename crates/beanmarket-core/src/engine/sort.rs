//! Listing sort orders
//!
//! Every order is applied with a stable sort, so records that compare equal
//! keep their incoming relative order across repeated sorts.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::catalog::Coffee;

/// Sort order selected by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortSpec {
    /// Keep input order
    #[default]
    Unsorted,
    PriceLowHigh,
    PriceHighLow,
    RatingHighLow,
    Name,
    Newest,
}

impl SortSpec {
    /// Parse a sort identifier; anything unrecognized is `Unsorted`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "price-low" | "price-asc" | "price-ascending" => SortSpec::PriceLowHigh,
            "price-high" | "price-desc" | "price-descending" => SortSpec::PriceHighLow,
            "rating" | "rating-high" | "rating-desc" => SortSpec::RatingHighLow,
            "name" | "name-asc" | "alphabetical" => SortSpec::Name,
            "newest" | "recent" | "recency" => SortSpec::Newest,
            _ => SortSpec::Unsorted,
        }
    }

    /// Canonical identifier, empty for `Unsorted`
    pub fn as_str(&self) -> &'static str {
        match self {
            SortSpec::Unsorted => "",
            SortSpec::PriceLowHigh => "price-low",
            SortSpec::PriceHighLow => "price-high",
            SortSpec::RatingHighLow => "rating",
            SortSpec::Name => "name",
            SortSpec::Newest => "newest",
        }
    }

    pub fn is_unsorted(&self) -> bool {
        matches!(self, SortSpec::Unsorted)
    }

    /// Comparator for this order; `None` for `Unsorted`
    ///
    /// Missing prices compare as the lowest possible value.
    pub fn compare(&self, a: &Coffee, b: &Coffee) -> Option<Ordering> {
        let ordering = match self {
            SortSpec::Unsorted => return None,
            SortSpec::PriceLowHigh => a.price.cmp(&b.price),
            SortSpec::PriceHighLow => b.price.cmp(&a.price),
            SortSpec::RatingHighLow => b.rating.total_cmp(&a.rating),
            SortSpec::Name => a
                .name
                .chars()
                .flat_map(char::to_lowercase)
                .cmp(b.name.chars().flat_map(char::to_lowercase)),
            SortSpec::Newest => b.listed_at.cmp(&a.listed_at),
        };
        Some(ordering)
    }
}

impl FromStr for SortSpec {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SortSpec::parse(s))
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SortSpec::parse(&raw))
    }
}

/// Reorder records per `spec`
pub fn sort(mut records: Vec<Coffee>, spec: SortSpec) -> Vec<Coffee> {
    if !spec.is_unsorted() {
        records.sort_by(|a, b| spec.compare(a, b).unwrap_or(Ordering::Equal));
    }
    records
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
