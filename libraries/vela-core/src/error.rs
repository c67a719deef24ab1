/// Seam error types for Vela Player collaborators
use thiserror::Error;

/// Errors from validating server identity configuration.
///
/// These are fatal: a malformed server identity is never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Server URL is empty
    #[error("server URL cannot be empty")]
    EmptyUrl,

    /// Server URL has a scheme other than http/https
    #[error("server URL must start with http:// or https://: {0}")]
    InvalidScheme(String),

    /// Server URL failed to parse
    #[error("invalid server URL {url}: {reason}")]
    InvalidUrl {
        /// The URL as supplied
        url: String,
        /// Parser message
        reason: String,
    },

    /// Username is empty
    #[error("username cannot be empty")]
    EmptyUsername,
}

/// Errors from a [`CredentialStore`](crate::traits::CredentialStore) backend.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The underlying secret storage failed
    #[error("credential backend error: {0}")]
    Backend(String),

    /// Stored credential could not be decoded
    #[error("failed to decode stored credential: {0}")]
    Decode(String),
}

/// Errors from the login exchange performed by a
/// [`LoginTransport`](crate::traits::LoginTransport).
///
/// The distinction between [`LoginError::InvalidCredentials`] and every
/// other variant is load bearing: stored credentials are discarded only on
/// proof that they are wrong, never because the network was briefly
/// unavailable.
#[derive(Error, Debug)]
pub enum LoginError {
    /// The server rejected the username/password pair
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The server could not be reached (connect failure, timeout)
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a non-auth error status
    #[error("login failed with server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        message: String,
    },

    /// The login response could not be decoded
    #[error("failed to parse login response: {0}")]
    Parse(String),
}

impl LoginError {
    /// Classify a login HTTP status code.
    ///
    /// 401 and 403 on the login call itself prove the credentials wrong;
    /// every other failing status is treated as transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::InvalidCredentials,
            _ => Self::Server {
                status,
                message: message.into(),
            },
        }
    }

    /// True only when the server proved the credentials wrong.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::InvalidCredentials)
    }
}
