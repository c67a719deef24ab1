//! Version-checked cache of constructed API clients.
//!
//! Building a `reqwest::Client` involves one-time expensive
//! initialization (TLS trust state), so clients are cached per server.
//! No cached client may outlive its token version: the cache compares the
//! handle's creation version against the session's current version on
//! every `get`, and the auth coordinator additionally invalidates eagerly
//! after each token change so sockets tied to the old token are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use vela_core::{Server, ServerKey};

use crate::error::{ApiError, Result};
use crate::session::{Session, SessionState};
use crate::token::TokenProvider;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP connect timeout in seconds
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A constructed API client bound to one server.
///
/// Clone is cheap: `reqwest::Client` uses `Arc` internally for connection
/// pooling. The handle records the token version it was built at for
/// staleness detection, but the token itself is attached per request by
/// [`TokenProvider`], never stored here. Fetch a fresh handle per logical
/// operation; never hold one in a long-lived field.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    server: Server,
    key: ServerKey,
    token_version: u64,
    http: reqwest::Client,
    tokens: TokenProvider,
}

impl ClientHandle {
    /// The server this client talks to
    pub fn server(&self) -> &Server {
        &self.inner.server
    }

    /// The session token version this client was built at
    pub fn token_version(&self) -> u64 {
        self.inner.token_version
    }

    /// Build a request for `path`, reading the current token as the auth
    /// header. The token is resolved on this call, so a handle fetched
    /// before a refresh still sends the fresh token.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.inner.server.base_url(), path);
        let request = self.inner.http.request(method, url);
        self.inner.tokens.attach(&self.inner.key, request)
    }

    /// GET request for `path`
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    /// POST request for `path`
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    /// Absolute URL for `path` with the current token as a query
    /// parameter, for endpoints that cannot take an auth header.
    pub fn url_with_token(&self, path: &str, param: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.inner.server.base_url(), path))
            .map_err(|e| ApiError::Configuration(e.to_string()))?;
        self.inner.tokens.attach_query(&self.inner.key, param, &mut url);
        Ok(url)
    }

    /// Send a request and decode a JSON body, classifying failures by
    /// structured status code.
    pub async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ApiError::Parse(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request expecting no body.
    pub async fn unit(&self, request: reqwest::RequestBuilder) -> Result<()> {
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

#[cfg(test)]
impl ClientHandle {
    fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Maps a server identity to its constructed client, invalidated (never
/// mutated) whenever the session token changes.
pub struct ClientCache {
    sessions: Arc<SessionState>,
    tokens: TokenProvider,
    entries: Mutex<HashMap<ServerKey, ClientHandle>>,
}

impl ClientCache {
    pub(crate) fn new(sessions: Arc<SessionState>, tokens: TokenProvider) -> Self {
        Self {
            sessions,
            tokens,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the client for `key`, rebuilding if absent or built at a
    /// token version other than the session's current one.
    pub async fn get(&self, key: &ServerKey) -> Result<ClientHandle> {
        let session = self
            .sessions
            .current(key)
            .ok_or_else(|| ApiError::UnknownServer(key.clone()))?;

        {
            let entries = self.entries.lock().await;
            if let Some(handle) = entries.get(key) {
                if handle.token_version() == session.token_version {
                    return Ok(handle.clone());
                }
                debug!(
                    %key,
                    cached = handle.token_version(),
                    current = session.token_version,
                    "cached client is stale, rebuilding"
                );
            }
        }

        let handle = Self::build(session, self.tokens.clone()).await?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.clone(), handle.clone());
        Ok(handle)
    }

    /// Drop the cached client for `key` so the next `get` builds a fresh
    /// one and the old connections are disposed.
    pub async fn invalidate(&self, key: &ServerKey) {
        if self.entries.lock().await.remove(key).is_some() {
            debug!(%key, "dropped cached client");
        }
    }

    // Client construction may load TLS trust state, so it runs on the
    // blocking pool rather than a latency-sensitive path. A construction
    // failure is a configuration error and is not retried.
    async fn build(session: Session, tokens: TokenProvider) -> Result<ClientHandle> {
        let key = session.server.key();
        debug!(%key, version = session.token_version, "building API client");

        tokio::task::spawn_blocking(move || {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .user_agent(format!("VelaPlayer/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| ApiError::Configuration(e.to_string()))?;

            Ok(ClientHandle {
                inner: Arc::new(HandleInner {
                    key,
                    token_version: session.token_version,
                    server: session.server,
                    http,
                    tokens,
                }),
            })
        })
        .await
        .map_err(|e| ApiError::Configuration(format!("client construction failed: {e}")))?
    }
}
