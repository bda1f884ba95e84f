//! Free-text search over coffee listings

use crate::catalog::Coffee;

/// Normalized search text
///
/// Matching is case-insensitive: substring over the descriptive text fields,
/// whole-value membership over the flavor note list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    needle: String,
}

impl SearchQuery {
    pub fn new(text: &str) -> Self {
        Self {
            needle: text.trim().to_lowercase(),
        }
    }

    /// An empty query matches everything
    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.needle
    }

    pub fn matches(&self, coffee: &Coffee) -> bool {
        if self.is_empty() {
            return true;
        }

        let text_fields = [
            Some(coffee.name.as_str()),
            Some(coffee.origin.as_str()),
            Some(coffee.region.as_str()),
            Some(coffee.processing.as_str()),
            Some(coffee.producer.as_str()),
            coffee.certification.as_deref(),
        ];

        text_fields
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&self.needle))
            || coffee
                .flavor_notes
                .iter()
                .any(|note| note.trim().to_lowercase() == self.needle)
    }
}

/// Keep only the records matching `query`
pub fn search(mut records: Vec<Coffee>, query: &SearchQuery) -> Vec<Coffee> {
    if !query.is_empty() {
        records.retain(|coffee| query.matches(coffee));
    }
    records
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
