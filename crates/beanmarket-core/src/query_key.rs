//! Deterministic query keys
//!
//! A key is `(namespace, parameters)` serialized to canonical JSON. Object
//! keys are sorted recursively before serialization, so two keys built from
//! the same logical inputs are byte-equal no matter the insertion order.
//! Equality, ordering, and hashing all go through the serialized form.

use core::fmt;
use core::hash::{Hash, Hasher};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::DataError;

/// Parameter values carried by a key
pub type ParamValue = Value;

// ----------------------------------------------------------------------------
// Query Key
// ----------------------------------------------------------------------------

/// Cache identifier derived from a resource namespace and its parameters
#[derive(Clone)]
pub struct QueryKey {
    namespace: String,
    params: BTreeMap<String, ParamValue>,
    serialized: String,
}

impl QueryKey {
    /// Key for a namespace without parameters
    pub fn new<N: Into<String>>(namespace: N) -> Self {
        Self::with_params(namespace, BTreeMap::new())
    }

    /// Start building a key with parameters
    pub fn builder<N: Into<String>>(namespace: N) -> QueryKeyBuilder {
        QueryKeyBuilder {
            namespace: namespace.into(),
            params: BTreeMap::new(),
        }
    }

    fn with_params<N: Into<String>>(namespace: N, params: BTreeMap<String, ParamValue>) -> Self {
        let namespace = namespace.into();
        let params: BTreeMap<String, ParamValue> = params
            .into_iter()
            .map(|(k, v)| (k, canonicalize(v)))
            .collect();
        let serialized = serialize_canonical(&namespace, &params);
        Self {
            namespace,
            params,
            serialized,
        }
    }

    /// Resource family, e.g. `coffees`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Canonical serialized form
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Whether this key falls under an invalidation prefix
    ///
    /// A prefix matches when it equals the namespace, or when it is a leading
    /// part of the serialized form (so a fully built key matches itself).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.namespace == prefix || self.serialized.starts_with(prefix)
    }

    /// Short SHA-256 fingerprint for log lines
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.serialized.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.serialized == other.serialized
    }
}

impl Eq for QueryKey {}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.serialized)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl Serialize for QueryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.serialized)
    }
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Accumulates parameters for a [`QueryKey`]
#[derive(Debug, Clone)]
pub struct QueryKeyBuilder {
    namespace: String,
    params: BTreeMap<String, ParamValue>,
}

impl QueryKeyBuilder {
    /// Add a parameter; a later value for the same name replaces the earlier one
    pub fn param<K: Into<String>, V: Into<ParamValue>>(mut self, name: K, value: V) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add any serializable value as a parameter
    pub fn param_serialized<K: Into<String>, V: Serialize>(
        mut self,
        name: K,
        value: &V,
    ) -> Result<Self, DataError> {
        let value = serde_json::to_value(value)?;
        self.params.insert(name.into(), value);
        Ok(self)
    }

    /// Add a parameter only when present
    pub fn param_opt<K: Into<String>, V: Into<ParamValue>>(self, name: K, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    pub fn build(self) -> QueryKey {
        QueryKey::with_params(self.namespace, self.params)
    }
}

// ----------------------------------------------------------------------------
// Canonical Serialization
// ----------------------------------------------------------------------------

/// Rebuild objects with sorted keys, recursively
///
/// `serde_json::Map` only sorts when the `preserve_order` feature is off; any
/// crate in the graph can turn it on, so ordering is enforced here.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn serialize_canonical(namespace: &str, params: &BTreeMap<String, ParamValue>) -> String {
    let mut out = String::with_capacity(namespace.len() + 16);
    out.push('[');
    out.push_str(&Value::String(namespace.to_string()).to_string());
    out.push(',');
    out.push('{');
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(name.clone()).to_string());
        out.push(':');
        out.push_str(&value.to_string());
    }
    out.push('}');
    out.push(']');
    out
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
