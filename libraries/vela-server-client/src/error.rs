//! Error types for the Vela server client.

use thiserror::Error;
use vela_core::{ConfigError, CredentialError, LoginError, ServerKey};

/// Errors surfaced across the public boundary of the session core.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connect failure, timeout). Never clears
    /// stored credentials; callers apply their own retry policy.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-auth error status. Returned to the
    /// caller unmodified; this core does not retry non-auth failures.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        message: String,
    },

    /// 401 after the single reauthentication retry was exhausted, or a
    /// failed reauthentication. The user must log in again.
    #[error("authentication required")]
    Unauthenticated,

    /// No saved password to attempt reauthentication with
    #[error("no stored credentials for {0}")]
    NoCredentials(ServerKey),

    /// Malformed server identity or client construction failure. Fatal,
    /// not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Response body could not be decoded
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The credential store backend failed
    #[error("credential store error: {0}")]
    CredentialStore(#[from] CredentialError),

    /// No session is registered for this server
    #[error("unknown server: {0}")]
    UnknownServer(ServerKey),
}

/// Result type for session core operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Maximum length for error response bodies carried in error values
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Classify a failing response by structured status code.
    ///
    /// 401 is the only status that drives the reauthentication retry; a
    /// 403 on an operation is an authorization failure and is returned
    /// unmodified.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthenticated,
            status => ApiError::Server {
                status,
                message: Self::truncate_body(body),
            },
        }
    }

    /// Map a transport-level reqwest failure.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// True when this failure should drive the single reauthentication
    /// retry in the request executor.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ApiError::Unauthenticated)
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Configuration(err.to_string())
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::InvalidCredentials => ApiError::Unauthenticated,
            LoginError::Unreachable(message) => ApiError::Network(message),
            LoginError::Server { status, message } => ApiError::Server { status, message },
            LoginError::Parse(message) => ApiError::Parse(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ApiError::from_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthenticated
        ));

        // 403 on an operation is not a reauth trigger
        assert!(matches!(
            ApiError::from_status(reqwest::StatusCode::FORBIDDEN, "nope"),
            ApiError::Server { status: 403, .. }
        ));
        assert!(matches!(
            ApiError::from_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            ApiError::Server { status: 500, .. }
        ));
    }

    #[test]
    fn only_unauthenticated_requires_reauth() {
        assert!(ApiError::Unauthenticated.requires_reauth());
        assert!(!ApiError::Network("timeout".into()).requires_reauth());
        assert!(!ApiError::Server {
            status: 500,
            message: "boom".into()
        }
        .requires_reauth());
        assert!(!ApiError::Configuration("bad url".into()).requires_reauth());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match ApiError::from_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::Server { message, .. } => {
                assert!(message.len() < 600);
                assert!(message.contains("truncated"));
            }
            e => panic!("Expected Server error, got: {:?}", e),
        }
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ApiError>();
    }
}
