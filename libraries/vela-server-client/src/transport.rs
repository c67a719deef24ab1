//! HTTP login transport for the Vela server API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vela_core::{LoginError, LoginTransport, Server, TokenGrant};

/// Login request timeout in seconds
const LOGIN_TIMEOUT_SECS: u64 = 30;

/// Connect timeout in seconds
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Request body for the login endpoint.
#[derive(Serialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Response from successful login.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    user_id: Option<String>,
}

/// [`LoginTransport`] implementation against
/// `{base_url}/api/auth/login`.
///
/// Failures are classified by structured status code: 401/403 from the
/// login endpoint itself is [`LoginError::InvalidCredentials`]; connect
/// failures and timeouts are [`LoginError::Unreachable`]; everything else
/// is a transient server error.
pub struct HttpLoginTransport {
    http: Client,
}

impl HttpLoginTransport {
    /// Create a transport with its own connection pool.
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(LOGIN_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(format!("VelaPlayer/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl LoginTransport for HttpLoginTransport {
    async fn login(&self, server: &Server, password: &str) -> Result<TokenGrant, LoginError> {
        let url = format!("{}/api/auth/login", server.base_url());
        debug!(url = %url, username = %server.username(), "attempting login");

        let request = LoginRequest {
            username: server.username().to_string(),
            password: password.to_string(),
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LoginError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let login: LoginResponse = response
                .json()
                .await
                .map_err(|e| LoginError::Parse(e.to_string()))?;

            info!(username = %server.username(), "login successful");
            Ok(TokenGrant {
                token: login.access_token,
                ttl: login.expires_in.map(Duration::from_secs),
                user_id: login.user_id,
            })
        } else {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            if code == 401 || code == 403 {
                warn!(status = code, username = %server.username(), "login rejected");
            } else {
                warn!(status = code, "login failed with server error");
            }
            Err(LoginError::from_status(code, body))
        }
    }
}
