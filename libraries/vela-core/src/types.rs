/// Identity and session-exchange types for Vela Player
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ConfigError;

/// Server identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Create a server ID from an existing value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random server ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a connected media server.
///
/// Immutable once constructed: a different URL or username is a different
/// server, not an update to this one. The derived [`ServerKey`] covers the
/// full triple, so an identity mismatch naturally keys a distinct session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    id: ServerId,
    base_url: String,
    username: String,
}

impl Server {
    /// Create a server identity, validating and normalizing the base URL.
    ///
    /// Trailing slashes are removed so endpoint paths can be joined with a
    /// plain `format!`. Rejects empty URLs, empty usernames, and schemes
    /// other than http/https.
    pub fn new(
        id: ServerId,
        base_url: impl Into<String>,
        username: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let raw: String = base_url.into();
        if raw.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        let base_url = raw.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidScheme(base_url));
        }
        Url::parse(&base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

        let username: String = username.into();
        if username.is_empty() {
            return Err(ConfigError::EmptyUsername);
        }

        Ok(Self {
            id,
            base_url,
            username,
        })
    }

    /// Server identifier
    pub fn id(&self) -> &ServerId {
        &self.id
    }

    /// Normalized base URL, no trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Account username on this server
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Cache/session key covering the full identity triple
    pub fn key(&self) -> ServerKey {
        ServerKey(format!(
            "{}|{}|{}",
            self.id, self.base_url, self.username
        ))
    }
}

/// Opaque key identifying one server identity.
///
/// Derived from id, base URL, and username together, so two `Server` values
/// that differ in any component never share sessions, clients, or
/// credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerKey(String);

impl ServerKey {
    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored credential as seen by the core.
///
/// The password is plaintext at this interface; at-rest encryption is the
/// store's concern and the core never inspects it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

// Manual Debug so a credential caught in a log line never leaks the password.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a successful login exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// The access token
    pub token: String,
    /// Token validity, if the server reported one
    pub ttl: Option<Duration>,
    /// Server-side user id, if reported
    pub user_id: Option<String>,
}
