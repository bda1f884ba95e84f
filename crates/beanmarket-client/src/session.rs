//! Authentication session store
//!
//! A [`Session`] pairs an access token with the signed-in profile; one cannot
//! exist without the other. The store starts as [`SessionState::NotLoaded`],
//! reads persisted state in [`SessionStore::initialize`], and changes only
//! through [`SessionStore::login`] and [`SessionStore::logout`]. Every change
//! is published through a `watch` channel and persisted.
//!
//! Persisted layout (string values):
//!
//! | key              | value                               |
//! |------------------|-------------------------------------|
//! | `token`          | access token                        |
//! | `user`           | profile as JSON                     |
//! | `token_type`     | usually `Bearer`                    |
//! | `expires_at`     | seconds since the epoch, optional   |
//! | `schema_version` | layout version, absent means 0      |

use beanmarket_core::{SessionConfig, SystemTimeSource, TimeSource, Timestamp};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::errors::{AuthError, NetworkError, StorageError};
use crate::http::{HttpClient, HttpResponse, HttpTransport, ReqwestTransport};
use crate::storage::KeyValueStore;

/// Current persisted layout version
pub const SCHEMA_VERSION: u32 = 1;

/// Storage keys
pub mod keys {
    pub const TOKEN: &str = "token";
    pub const USER: &str = "user";
    pub const TOKEN_TYPE: &str = "token_type";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const SCHEMA_VERSION: &str = "schema_version";

    pub const ALL: [&str; 5] = [TOKEN, USER, TOKEN_TYPE, EXPIRES_AT, SCHEMA_VERSION];
}

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

// ----------------------------------------------------------------------------
// Session Types
// ----------------------------------------------------------------------------

/// Access token issued at login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    pub token_type: String,
    pub expires_at: Option<Timestamp>,
}

impl AuthToken {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Signed-in user as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any other fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

/// Token and profile, always together
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    token: AuthToken,
    profile: Profile,
}

impl Session {
    pub fn new(token: AuthToken, profile: Profile) -> Self {
        Self { token, profile }
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }
}

/// Observable session state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Persisted state not read yet
    #[default]
    NotLoaded,
    SignedOut,
    SignedIn(Session),
}

impl SessionState {
    pub fn is_loaded(&self) -> bool {
        !matches!(self, SessionState::NotLoaded)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::SignedIn(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.session().is_some()
    }
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FederatedProvider {
    Google,
    Apple,
}

impl FederatedProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederatedProvider::Google => "google",
            FederatedProvider::Apple => "apple",
        }
    }
}

/// What the user signs in with
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { email: String, password: String },
    /// Identity assertion from a federated provider, exchanged server-side
    Federated { provider: FederatedProvider, id_token: String },
}

impl Credentials {
    pub fn password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Password {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn google(id_token: impl Into<String>) -> Self {
        Credentials::Federated {
            provider: FederatedProvider::Google,
            id_token: id_token.into(),
        }
    }

    pub fn apple(id_token: impl Into<String>) -> Self {
        Credentials::Federated {
            provider: FederatedProvider::Apple,
            id_token: id_token.into(),
        }
    }

    fn endpoint<'a>(&self, config: &'a SessionConfig) -> &'a str {
        match self {
            Credentials::Password { .. } => &config.login_path,
            Credentials::Federated {
                provider: FederatedProvider::Google,
                ..
            } => &config.google_login_path,
            Credentials::Federated {
                provider: FederatedProvider::Apple,
                ..
            } => &config.apple_login_path,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Credentials::Password { email, password } => {
                serde_json::json!({ "email": email, "password": password })
            }
            Credentials::Federated { provider, id_token } => {
                serde_json::json!({ "provider": provider.as_str(), "id_token": id_token })
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .finish_non_exhaustive(),
            Credentials::Federated { provider, .. } => f
                .debug_struct("Federated")
                .field("provider", provider)
                .finish_non_exhaustive(),
        }
    }
}

// ----------------------------------------------------------------------------
// Login Response Mapping
// ----------------------------------------------------------------------------

/// Map a login round trip onto the auth taxonomy
///
/// Successful responses pass through; everything else becomes an
/// [`AuthError`] carrying the server's message when it sent one.
pub fn map_login_outcome(outcome: Result<HttpResponse, NetworkError>) -> Result<HttpResponse, AuthError> {
    let response = match outcome {
        Ok(response) => response,
        Err(NetworkError::Timeout { .. }) => return Err(AuthError::Timeout),
        Err(NetworkError::Unreachable { .. } | NetworkError::NoResponse { .. }) => {
            return Err(AuthError::NetworkUnavailable)
        }
        Err(err @ NetworkError::InvalidUrl { .. }) => return Err(AuthError::Unknown(err.to_string())),
    };

    if response.is_success() {
        return Ok(response);
    }

    let message = response.server_message();
    Err(match response.status {
        400 | 401 | 403 | 404 | 422 => AuthError::InvalidCredentials {
            message: message.unwrap_or_else(|| "Invalid email or password".to_string()),
        },
        status @ 500..=599 => AuthError::ServerError {
            status,
            message: message.unwrap_or_else(|| "Server error, please try again later".to_string()),
        },
        status => AuthError::Unknown(message.unwrap_or_else(|| format!("Unexpected response status {status}"))),
    })
}

#[derive(Deserialize)]
struct LoginPayload {
    #[serde(alias = "access_token")]
    token: Option<String>,
    token_type: Option<String>,
    /// Seconds since the epoch
    expires_at: Option<u64>,
    /// Seconds from now
    expires_in: Option<u64>,
    #[serde(alias = "profile")]
    user: Option<Profile>,
}

/// Build a session from a successful login body
pub fn session_from_login(response: &HttpResponse, now: Timestamp) -> Result<Session, AuthError> {
    let payload: LoginPayload = response
        .json()
        .map_err(|e| AuthError::Unknown(format!("Unreadable login response: {e}")))?;

    let (Some(token), Some(profile)) = (payload.token.filter(|t| !t.is_empty()), payload.user) else {
        return Err(AuthError::Unknown("Login response is missing the token or user".to_string()));
    };

    let expires_at = payload
        .expires_at
        .map(Timestamp::from_secs)
        .or_else(|| payload.expires_in.map(|secs| now + core::time::Duration::from_secs(secs)));

    Ok(Session::new(
        AuthToken {
            token,
            token_type: payload.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_at,
        },
        profile,
    ))
}

// ----------------------------------------------------------------------------
// Session Store
// ----------------------------------------------------------------------------

struct SessionInner<T: HttpTransport> {
    http: HttpClient<T>,
    storage: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    time_source: Arc<dyn TimeSource>,
    state: watch::Sender<SessionState>,
    /// Serializes state changes with their persistence writes
    writer: Mutex<()>,
}

/// Owner of the signed-in session
///
/// Cloning is cheap; clones share state.
pub struct SessionStore<T: HttpTransport = ReqwestTransport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: HttpTransport> Clone for SessionStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport + 'static> SessionStore<T> {
    pub fn new(http: HttpClient<T>, storage: Arc<dyn KeyValueStore>, config: SessionConfig) -> Self {
        Self::with_time_source(http, storage, config, Arc::new(SystemTimeSource::new()))
    }

    pub fn with_time_source(
        http: HttpClient<T>,
        storage: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::NotLoaded);
        Self {
            inner: Arc::new(SessionInner {
                http,
                storage,
                config,
                time_source,
                state,
                writer: Mutex::new(()),
            }),
        }
    }

    /// Latest state
    pub fn current(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// `Authorization` header value for the live, unexpired session
    pub fn authorization_header(&self) -> Option<String> {
        let now = self.inner.time_source.now();
        self.inner
            .state
            .borrow()
            .session()
            .filter(|session| !session.token.is_expired(now))
            .map(|session| session.token.header_value())
    }

    /// Read persisted state
    ///
    /// Does nothing if a login or logout already settled the state. Storage
    /// failures leave the store signed out. Holds the writer lock throughout,
    /// so a concurrent login persists after any layout migration written here.
    pub async fn initialize(&self) -> SessionState {
        let _writer = self.inner.writer.lock().await;
        let settled = self.inner.state.borrow().is_loaded();
        if settled {
            debug!("Session already settled, persisted state ignored");
            return self.current();
        }

        let loaded = match self.load_persisted().await {
            Ok(Some(session)) => SessionState::SignedIn(session),
            Ok(None) => SessionState::SignedOut,
            Err(err) => {
                warn!("Failed to read persisted session: {}", err);
                SessionState::SignedOut
            }
        };

        let signed_in = loaded.is_signed_in();
        self.inner.state.send_replace(loaded);
        info!(signed_in, "Session initialized");
        self.current()
    }

    /// Exchange credentials for a session
    ///
    /// On success the token and profile become visible together, then are
    /// persisted. A failed persistence write is logged and does not fail the
    /// login.
    pub async fn login(&self, credentials: Credentials) -> Result<Profile, AuthError> {
        let path = credentials.endpoint(&self.inner.config);
        debug!(?credentials, path, "Logging in");

        let outcome = self.inner.http.post(path, credentials.body()).await;
        let response = map_login_outcome(outcome)?;
        let session = session_from_login(&response, self.inner.time_source.now())?;
        let profile = session.profile.clone();

        let _writer = self.inner.writer.lock().await;
        let pairs = persisted_pairs(&session);
        self.inner.state.send_replace(SessionState::SignedIn(session));

        let mut persisted = self.inner.storage.set_many(&pairs).await;
        if persisted.is_ok() && !pairs.iter().any(|(key, _)| *key == keys::EXPIRES_AT) {
            persisted = self.inner.storage.remove_many(&[keys::EXPIRES_AT]).await;
        }
        if let Err(err) = persisted {
            warn!("Failed to persist session: {}", err);
        }

        info!(user = %profile.id, "Logged in");
        Ok(profile)
    }

    /// Clear the session from memory, then from storage
    ///
    /// Safe to call when already signed out.
    pub async fn logout(&self) {
        let _writer = self.inner.writer.lock().await;
        let was_signed_in = self.inner.state.send_replace(SessionState::SignedOut).is_signed_in();

        if let Err(err) = self.inner.storage.remove_many(&keys::ALL).await {
            warn!("Failed to clear persisted session: {}", err);
        }
        if was_signed_in {
            info!("Logged out");
        }
    }

    async fn load_persisted(&self) -> Result<Option<Session>, StorageError> {
        let storage = &self.inner.storage;
        let version = match storage.get(keys::SCHEMA_VERSION).await? {
            None => 0,
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| StorageError::Corrupt {
                key: keys::SCHEMA_VERSION.to_string(),
                reason: e.to_string(),
            })?,
        };
        if version > SCHEMA_VERSION {
            warn!(version, "Persisted session has a newer layout, ignoring it");
            return Ok(None);
        }

        let Some(token) = storage.get(keys::TOKEN).await?.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let profile = match storage.get(keys::USER).await? {
            Some(raw) => match serde_json::from_str::<Profile>(&raw) {
                Ok(profile) => Some(profile),
                Err(err) => {
                    warn!("Discarding persisted session with unreadable profile: {}", err);
                    None
                }
            },
            None => None,
        };
        let Some(profile) = profile else {
            storage.remove_many(&keys::ALL).await?;
            return Ok(None);
        };

        let token_type = storage
            .get(keys::TOKEN_TYPE)
            .await?
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());
        let expires_at = storage
            .get(keys::EXPIRES_AT)
            .await?
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Timestamp::from_secs);

        let session = Session::new(
            AuthToken {
                token,
                token_type,
                expires_at,
            },
            profile,
        );

        if session.token.is_expired(self.inner.time_source.now()) {
            info!("Persisted session expired");
            storage.remove_many(&keys::ALL).await?;
            return Ok(None);
        }

        if version < SCHEMA_VERSION {
            info!(from = version, to = SCHEMA_VERSION, "Migrating persisted session layout");
            storage.set_many(&persisted_pairs(&session)).await?;
        }

        Ok(Some(session))
    }
}

impl<T: HttpTransport> fmt::Debug for SessionStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

/// Key-value pairs written for `session`
fn persisted_pairs(session: &Session) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        (keys::TOKEN, session.token.token.clone()),
        (
            keys::USER,
            serde_json::to_string(&session.profile).unwrap_or_else(|_| "{}".to_string()),
        ),
        (keys::TOKEN_TYPE, session.token.token_type.clone()),
        (keys::SCHEMA_VERSION, SCHEMA_VERSION.to_string()),
    ];
    if let Some(at) = session.token.expires_at {
        pairs.push((keys::EXPIRES_AT, at.as_secs().to_string()));
    }
    pairs
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_mapping() {
        let timeout = map_login_outcome(Err(NetworkError::Timeout { duration_ms: 15_000 }));
        assert_eq!(timeout.unwrap_err(), AuthError::Timeout);

        let offline = map_login_outcome(Err(NetworkError::Unreachable { reason: "dns".into() }));
        assert_eq!(offline.unwrap_err(), AuthError::NetworkUnavailable);

        let misconfigured = map_login_outcome(Err(NetworkError::InvalidUrl {
            path: "http://[".into(),
            reason: "invalid IPv6 address".into(),
        }));
        assert!(matches!(misconfigured.unwrap_err(), AuthError::Unknown(m) if m.contains("Invalid request URL")));

        let rejected = map_login_outcome(Ok(HttpResponse::json_body(401, &json!({ "message": "Wrong password" }))));
        assert_eq!(
            rejected.unwrap_err(),
            AuthError::InvalidCredentials {
                message: "Wrong password".into()
            }
        );

        let down = map_login_outcome(Ok(HttpResponse::new(503, "")));
        assert!(matches!(down.unwrap_err(), AuthError::ServerError { status: 503, .. }));

        let odd = map_login_outcome(Ok(HttpResponse::json_body(302, &json!({ "error": "moved" }))));
        assert_eq!(odd.unwrap_err(), AuthError::Unknown("moved".into()));

        assert!(map_login_outcome(Ok(HttpResponse::new(200, "{}"))).is_ok());
    }

    #[test]
    fn test_session_from_login_variants() {
        let now = Timestamp::from_secs(1_000);
        let response = HttpResponse::json_body(
            200,
            &json!({
                "access_token": "abc",
                "expires_in": 60,
                "user": { "id": 42, "email": "buyer@roastery.test", "company": "Roastery" }
            }),
        );
        let session = session_from_login(&response, now).unwrap();
        assert_eq!(session.token().header_value(), "Bearer abc");
        assert_eq!(session.token().expires_at, Some(Timestamp::from_secs(1_060)));
        assert_eq!(session.profile().id, "42");
        assert_eq!(session.profile().extra["company"], "Roastery");

        let missing_user = HttpResponse::json_body(200, &json!({ "token": "abc" }));
        assert!(matches!(session_from_login(&missing_user, now), Err(AuthError::Unknown(_))));
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let rendered = format!("{:?}", Credentials::password("a@b.test", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        let rendered = format!("{:?}", AuthToken::bearer("secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
