//! Error types for the BeanMarket core
//!
//! Data errors cover malformed payloads and field parse failures. Most of them
//! are recovered locally (see `catalog::normalize_listing` and
//! `price::Price::parse_lenient`), they surface only from the strict parsing
//! entry points.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Malformed response shapes and unparsable fields
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("Malformed listing: {reason}")]
    MalformedListing { reason: String },
    #[error("Invalid price: {raw:?}")]
    InvalidPrice { raw: String },
    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },
    #[error("Invalid JSON: {reason}")]
    Json { reason: String },
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Failed to load configuration: {reason}")]
    Load { reason: String },
}

// ----------------------------------------------------------------------------
// Core Error
// ----------------------------------------------------------------------------

/// Core error type for the BeanMarket data layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Json {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Data(err.into())
    }
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl CoreError {
    /// Create a malformed listing error
    pub fn malformed_listing<T: Into<String>>(reason: T) -> Self {
        CoreError::Data(DataError::MalformedListing {
            reason: reason.into(),
        })
    }

    /// Create an invalid record error
    pub fn invalid_record<I: Into<String>, R: Into<String>>(id: I, reason: R) -> Self {
        CoreError::Data(DataError::InvalidRecord {
            id: id.into(),
            reason: reason.into(),
        })
    }

    /// Create a configuration error for a specific field
    pub fn config_error<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        CoreError::Config(ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CoreError>;
pub type CoreResult<T> = Result<T>;
