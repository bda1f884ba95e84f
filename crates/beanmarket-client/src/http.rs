//! Retrying HTTP client
//!
//! [`HttpClient`] joins request paths onto a fixed base URL, applies a
//! per-attempt timeout, and retries transient failures (timeout, unreachable,
//! no response) with a fixed delay. A response that arrives is returned as-is,
//! whatever its status; callers decide what a 4xx or 5xx means.
//!
//! The wire itself sits behind [`HttpTransport`]; [`ReqwestTransport`] is the
//! production implementation.

use async_trait::async_trait;
use beanmarket_core::{ApiConfig, ConfigError, DataError};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::{ClientError, NetworkError};

// ----------------------------------------------------------------------------
// Request and Response
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, ready for a transport
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Path component of the URL, for logging
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// A received response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Response with a JSON body
    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        let mut response = Self::new(status, body.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DataError> {
        serde_json::from_slice(&self.body).map_err(DataError::from)
    }

    /// Human-readable error text from the body, if the server sent one
    ///
    /// Looks at `message`, then `detail`, then `error`.
    pub fn server_message(&self) -> Option<String> {
        let payload: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        ["message", "detail", "error"].iter().find_map(|field| {
            payload
                .get(field)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Sends one request and waits for one response
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        (**self).send(request).await
    }
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                ClientError::Config(ConfigError::InvalidValue {
                    field: "api".to_string(),
                    reason: format!("cannot build HTTP client: {e}"),
                })
            })?;
        Ok(Self {
            client,
            timeout_ms: config.timeout_ms,
        })
    }

    fn classify(&self, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout {
                duration_ms: self.timeout_ms,
            }
        } else if err.is_connect() {
            NetworkError::Unreachable {
                reason: err.to_string(),
            }
        } else {
            NetworkError::NoResponse {
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Attempt Context
// ----------------------------------------------------------------------------

/// Immutable per-attempt state, replaced rather than mutated on retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub request_id: Uuid,
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
}

impl AttemptContext {
    pub fn first(max_attempts: u32) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attempt: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Context for the following attempt, if any remain
    pub fn next(self) -> Option<Self> {
        (self.attempt < self.max_attempts).then(|| Self {
            attempt: self.attempt + 1,
            ..self
        })
    }

    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

// ----------------------------------------------------------------------------
// HTTP Client
// ----------------------------------------------------------------------------

/// Produces the `Authorization` header value for the current session
pub type AuthorizationFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Retrying client over a base URL
pub struct HttpClient<T: HttpTransport = ReqwestTransport> {
    transport: Arc<T>,
    base_url: Url,
    config: ApiConfig,
    default_headers: BTreeMap<String, String>,
    authorization: Option<AuthorizationFn>,
}

impl<T: HttpTransport> Clone for HttpClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            base_url: self.base_url.clone(),
            config: self.config.clone(),
            default_headers: self.default_headers.clone(),
            authorization: self.authorization.clone(),
        }
    }
}

impl HttpClient<ReqwestTransport> {
    /// Client over the production transport
    pub fn from_config(config: &ApiConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(config)?;
        Self::new(transport, config.clone())
    }
}

impl<T: HttpTransport> HttpClient<T> {
    pub fn new(transport: T, config: ApiConfig) -> Result<Self, ClientError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let default_headers = [
            ("accept", "application/json"),
            ("content-type", "application/json"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Ok(Self {
            transport: Arc::new(transport),
            base_url,
            config,
            default_headers,
            authorization: None,
        })
    }

    /// Copy of this client that sends `Authorization` when `source` yields one
    pub fn with_authorization(&self, source: AuthorizationFn) -> Self {
        Self {
            authorization: Some(source),
            ..self.clone()
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL, keeping the base path
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse, NetworkError> {
        self.request(Method::Get, path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<HttpResponse, NetworkError> {
        self.request(Method::Post, path, Some(body), &[]).await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse, NetworkError> {
        self.request(Method::Delete, path, None, &[]).await
    }

    /// Send a request, retrying transient failures
    ///
    /// Per-call `headers` override the defaults. The returned error is the
    /// failure of the last attempt.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, NetworkError> {
        let url = self.url(path).map_err(|e| NetworkError::InvalidUrl {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let mut all_headers = self.default_headers.clone();
        if let Some(value) = self.authorization.as_ref().and_then(|source| source()) {
            all_headers.insert("authorization".to_string(), value);
        }
        for (name, value) in headers {
            all_headers.insert(name.to_ascii_lowercase(), value.to_string());
        }

        let request = HttpRequest {
            method,
            url,
            headers: all_headers,
            body,
        };
        self.send_with_retry(&request).await
    }

    async fn send_with_retry(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let mut ctx = AttemptContext::first(self.config.max_attempts());

        loop {
            let outcome = match tokio::time::timeout(self.config.timeout(), self.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::Timeout {
                    duration_ms: self.config.timeout_ms,
                }),
            };

            match outcome {
                Ok(response) => {
                    info!(
                        request_id = %ctx.request_id,
                        method = %request.method,
                        path = request.path(),
                        attempt = ctx.attempt,
                        status = response.status,
                        "HTTP request completed"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    let next = if err.is_transient() { ctx.next() } else { None };
                    match next {
                        Some(next) => {
                            warn!(
                                request_id = %ctx.request_id,
                                method = %request.method,
                                path = request.path(),
                                attempt = ctx.attempt,
                                error = %err,
                                "HTTP attempt failed, retrying"
                            );
                            tokio::time::sleep(self.config.retry_delay()).await;
                            ctx = next;
                        }
                        None => {
                            warn!(
                                request_id = %ctx.request_id,
                                method = %request.method,
                                path = request.path(),
                                attempt = ctx.attempt,
                                error = %err,
                                "HTTP request failed"
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}

impl<T: HttpTransport> fmt::Debug for HttpClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("max_attempts", &self.config.max_attempts())
            .field("authorized", &self.authorization.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
