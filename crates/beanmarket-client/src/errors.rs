//! Error types for the BeanMarket client
//!
//! Transport failures, authentication outcomes, session persistence, and the
//! cloneable query error stored in cache snapshots, unified under
//! [`ClientError`].

use beanmarket_core::{ConfigError, CoreError, DataError};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures that happen before a response is received
///
/// Everything except [`NetworkError::InvalidUrl`] is transient and retried by
/// the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Server unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("No response received: {reason}")]
    NoResponse { reason: String },
    /// The request path could not be resolved against the base URL
    #[error("Invalid request URL for {path}: {reason}")]
    InvalidUrl { path: String, reason: String },
}

impl NetworkError {
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Timeout { .. } | NetworkError::Unreachable { .. } | NetworkError::NoResponse { .. } => true,
            NetworkError::InvalidUrl { .. } => false,
        }
    }
}

/// Login outcomes surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },
    #[error("Network unavailable")]
    NetworkUnavailable,
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("Login timed out")]
    Timeout,
    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    /// Text suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials { message } | AuthError::ServerError { message, .. } => {
                message.clone()
            }
            AuthError::NetworkUnavailable => "No network connection".to_string(),
            AuthError::Timeout => "The server took too long to respond".to_string(),
            AuthError::Unknown(message) => message.clone(),
        }
    }
}

/// Session persistence failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {reason}")]
    Io { reason: String },
    #[error("Corrupt stored value for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            reason: err.to_string(),
        }
    }
}

/// Fetch failure recorded in a query cache entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Fetch aborted: {reason}")]
    Aborted { reason: String },
}

// ----------------------------------------------------------------------------
// Client Error
// ----------------------------------------------------------------------------

/// Unified error type for the BeanMarket client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Data(e) => ClientError::Data(e),
            CoreError::Config(e) => ClientError::Config(e),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Data(err.into())
    }
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ClientError {
    /// Create a storage I/O error
    pub fn storage_io<T: Into<String>>(reason: T) -> Self {
        ClientError::Storage(StorageError::Io {
            reason: reason.into(),
        })
    }

    /// Create a configuration loading error
    pub fn config_load<T: Into<String>>(reason: T) -> Self {
        ClientError::Config(ConfigError::Load {
            reason: reason.into(),
        })
    }
}

/// Result type alias for client operations
pub type Result<T> = core::result::Result<T, ClientError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
