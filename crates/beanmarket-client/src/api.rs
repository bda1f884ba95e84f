//! Marketplace API endpoints
//!
//! Thin typed wrappers over [`HttpClient`]. Listing endpoints go through the
//! listing normalization boundary, so callers always get a `Vec` no matter
//! which envelope the backend used. Non-2xx responses become
//! [`QueryError::Status`].

use beanmarket_core::{normalize_coffees, normalize_listing, Coffee};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::errors::QueryError;
use crate::http::{HttpClient, HttpResponse, HttpTransport, ReqwestTransport};
use crate::session::SessionStore;

/// Endpoint paths relative to the base URL
pub mod endpoints {
    pub const POSTS: &str = "/posts";
    pub const USERS: &str = "/users";
    pub const COFFEES: &str = "/coffees";
    pub const GENERATE_RESPONSE: &str = "/genai/generate-response";
}

/// Marketplace endpoints over one HTTP client
pub struct MarketplaceApi<T: HttpTransport = ReqwestTransport> {
    http: HttpClient<T>,
}

impl<T: HttpTransport> Clone for MarketplaceApi<T> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
        }
    }
}

impl<T: HttpTransport + 'static> MarketplaceApi<T> {
    pub fn new(http: HttpClient<T>) -> Self {
        Self { http }
    }

    /// API whose requests carry the session's `Authorization` header
    pub fn authorized(http: &HttpClient<T>, session: &SessionStore<T>) -> Self {
        let session = session.clone();
        Self {
            http: http.with_authorization(Arc::new(move || session.authorization_header())),
        }
    }

    pub fn http(&self) -> &HttpClient<T> {
        &self.http
    }

    /// GET a listing endpoint and decode its rows, skipping malformed ones
    pub async fn list<R: DeserializeOwned>(&self, path: &str) -> Result<Vec<R>, QueryError> {
        let response = expect_success(self.http.get(path).await?)?;
        let payload: serde_json::Value = response.json()?;
        let rows = normalize_listing(payload);
        debug!(path, rows = rows.len(), "Listing fetched");
        Ok(rows)
    }

    pub async fn list_posts(&self) -> Result<Vec<serde_json::Value>, QueryError> {
        self.list(endpoints::POSTS).await
    }

    pub async fn create_post(&self, post: serde_json::Value) -> Result<serde_json::Value, QueryError> {
        let response = expect_success(self.http.post(endpoints::POSTS, post).await?)?;
        if response.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(response.json()?)
    }

    pub async fn delete_post(&self, id: &str) -> Result<(), QueryError> {
        let path = format!("{}/{}", endpoints::POSTS, id);
        expect_success(self.http.delete(&path).await?)?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<serde_json::Value>, QueryError> {
        self.list(endpoints::USERS).await
    }

    /// Coffee listings, normalized for the engine
    pub async fn list_coffees(&self) -> Result<Vec<Coffee>, QueryError> {
        let response = expect_success(self.http.get(endpoints::COFFEES).await?)?;
        let payload: serde_json::Value = response.json()?;
        Ok(normalize_coffees(payload))
    }

    /// Ask the assistant endpoint; the response body is returned as-is
    pub async fn generate_response(&self, prompt: &str) -> Result<serde_json::Value, QueryError> {
        let body = serde_json::json!({ "prompt": prompt });
        let response = expect_success(self.http.post(endpoints::GENERATE_RESPONSE, body).await?)?;
        Ok(response.json()?)
    }
}

impl<T: HttpTransport> fmt::Debug for MarketplaceApi<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketplaceApi").field("http", &self.http).finish()
    }
}

/// Turn a non-2xx response into a [`QueryError::Status`]
pub fn expect_success(response: HttpResponse) -> Result<HttpResponse, QueryError> {
    if response.is_success() {
        return Ok(response);
    }
    let message = response
        .server_message()
        .unwrap_or_else(|| format!("request failed with status {}", response.status));
    Err(QueryError::Status {
        status: response.status,
        message,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_success() {
        assert!(expect_success(HttpResponse::new(204, "")).is_ok());

        let err = expect_success(HttpResponse::json_body(404, &json!({ "detail": "No such post" }))).unwrap_err();
        assert_eq!(
            err,
            QueryError::Status {
                status: 404,
                message: "No such post".into()
            }
        );
    }
}
