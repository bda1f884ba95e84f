//! Coffee listings and the response normalization boundary
//!
//! The backend is loose about listing shapes: a listing may come back as a
//! bare array or wrapped as `{ "data": [...] }`, and prices arrive as display
//! strings. Everything is normalized here so the engine and the query hooks
//! only ever see [`Coffee`] values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use smallvec::SmallVec;

use crate::errors::DataError;
use crate::price::Price;
use crate::types::Timestamp;

/// Flavor notes rarely exceed a handful per lot
pub type FlavorNotes = SmallVec<[String; 4]>;

// ----------------------------------------------------------------------------
// Coffee Record
// ----------------------------------------------------------------------------

/// A green coffee lot offered on the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coffee {
    /// Stable listing identifier, e.g. `coffee-001`
    pub id: String,
    pub name: String,
    /// Country or "town, country" of origin
    pub origin: String,
    pub region: String,
    /// Processing method (Washed, Natural, Honey, ...)
    pub processing: String,
    pub producer: String,
    pub certification: Option<String>,
    pub variety: Option<String>,
    pub flavor_notes: FlavorNotes,
    /// `None` when the listed price could not be parsed
    pub price: Option<Price>,
    /// Cupping-derived rating on a 0-5 scale
    pub rating: f32,
    pub listed_at: Timestamp,
}

/// Raw listing row as served by the API
///
/// Field names follow the backend's camelCase JSON. Only `id` and `name` are
/// required; everything else falls back to an empty value. Scalar fields
/// accept either JSON numbers or strings, and a value of the wrong shape reads
/// as missing instead of rejecting the row.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoffeeRecord {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, alias = "process", alias = "processingMethod")]
    pub processing: String,
    #[serde(default, alias = "farm")]
    pub producer: String,
    #[serde(default)]
    pub certification: Option<String>,
    #[serde(default)]
    pub variety: Option<String>,
    #[serde(default, alias = "notes")]
    pub flavor_notes: Vec<String>,
    /// Display price; bare numbers are major units
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: Option<String>,
    #[serde(default, deserialize_with = "lenient_rating")]
    pub rating: Option<f32>,
    /// Seconds since the epoch, or an RFC 3339 date-time
    #[serde(default, alias = "createdAt", deserialize_with = "lenient_listed_at")]
    pub listed_at: Option<u64>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            json_kind(&other)
        ))),
    }
}

fn lenient_price<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => n.as_f64().map(|major| format!("{major:.2}")),
        _ => None,
    })
}

fn lenient_rating<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f32>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64().map(|r| r as f32),
        serde_json::Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    })
}

fn lenient_listed_at<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|secs| *secs >= 0.0).map(|secs| secs as u64)),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .ok()
            .or_else(|| Timestamp::parse_rfc3339(&s).map(|at| at.as_secs())),
        _ => None,
    })
}

impl From<CoffeeRecord> for Coffee {
    fn from(record: CoffeeRecord) -> Self {
        let price = record.price.as_deref().and_then(Price::parse_lenient);
        Coffee {
            id: record.id,
            name: record.name,
            origin: record.origin,
            region: record.region,
            processing: record.processing,
            producer: record.producer,
            certification: record.certification.filter(|c| !c.trim().is_empty()),
            variety: record.variety.filter(|v| !v.trim().is_empty()),
            flavor_notes: record.flavor_notes.into_iter().collect(),
            price,
            rating: record.rating.filter(|r| r.is_finite()).unwrap_or(0.0),
            listed_at: Timestamp::from_secs(record.listed_at.unwrap_or(0)),
        }
    }
}

// ----------------------------------------------------------------------------
// Listing Normalization
// ----------------------------------------------------------------------------

/// Extract the row array from either listing shape
pub fn listing_rows(payload: serde_json::Value) -> Result<Vec<serde_json::Value>, DataError> {
    match payload {
        serde_json::Value::Array(rows) => Ok(rows),
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(rows)) => Ok(rows),
            Some(other) => Err(DataError::MalformedListing {
                reason: format!("`data` is {}, expected an array", json_kind(&other)),
            }),
            None => Err(DataError::MalformedListing {
                reason: "object without a `data` array".to_string(),
            }),
        },
        other => Err(DataError::MalformedListing {
            reason: format!("payload is {}", json_kind(&other)),
        }),
    }
}

/// Strictly decode a listing payload into rows of `T`
pub fn decode_listing<T: DeserializeOwned>(payload: serde_json::Value) -> Result<Vec<T>, DataError> {
    listing_rows(payload)?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(DataError::from))
        .collect()
}

/// Fail-soft listing decode
///
/// A malformed payload becomes an empty listing; individual rows that fail to
/// decode are skipped. Both cases are logged.
pub fn normalize_listing<T: DeserializeOwned>(payload: serde_json::Value) -> Vec<T> {
    let rows = match listing_rows(payload) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!("Substituting empty listing: {}", err);
            return Vec::new();
        }
    };

    let total = rows.len();
    let decoded: Vec<T> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::debug!("Skipping listing row: {}", err);
                None
            }
        })
        .collect();

    if decoded.len() < total {
        tracing::warn!("Skipped {} of {} listing rows", total - decoded.len(), total);
    }
    decoded
}

/// Normalize a coffee listing payload into engine-ready records
pub fn normalize_coffees(payload: serde_json::Value) -> Vec<Coffee> {
    normalize_listing::<CoffeeRecord>(payload)
        .into_iter()
        .map(Coffee::from)
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
