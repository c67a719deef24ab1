//! Process-scoped wiring of the session core.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use vela_core::{CredentialStore, LoginTransport, Server, ServerKey};

use crate::cache::{ClientCache, ClientHandle};
use crate::coordinator::AuthCoordinator;
use crate::credentials::MemoryCredentialStore;
use crate::error::{ApiError, Result};
use crate::executor::RequestExecutor;
use crate::session::{Session, SessionState};
use crate::token::TokenProvider;

/// The session core, wired and ready.
///
/// One `SessionManager` is constructed at startup and passed by reference
/// to every component that talks to a server; there is no ambient global
/// state. The two entry points other modules need are
/// [`client`](Self::client) ("give me a client for server X") and
/// [`execute`](Self::execute) ("run this authenticated operation with
/// retry").
///
/// # Example
///
/// ```ignore
/// use vela_core::{Server, ServerId};
/// use vela_server_client::SessionManager;
///
/// let manager = SessionManager::builder().build()?;
///
/// let server = Server::new(ServerId::generate(), "https://media.example.com", "alice")?;
/// let key = server.key();
/// manager.connect(server, "secret").await?;
///
/// let info: serde_json::Value = manager
///     .execute(&key, |client| async move {
///         let request = client.get("/api/system/info");
///         client.json(request).await
///     })
///     .await?;
/// ```
pub struct SessionManager {
    sessions: Arc<SessionState>,
    cache: Arc<ClientCache>,
    coordinator: AuthCoordinator,
    executor: RequestExecutor,
}

impl SessionManager {
    /// Start building a manager.
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// First login for `server`: performs the exchange and remembers the
    /// credential on success.
    pub async fn connect(&self, server: Server, password: &str) -> Result<Session> {
        self.coordinator.login(server, password).await
    }

    /// Adopt a previously persisted token without a fresh login, e.g. on
    /// application startup.
    pub fn resume(&self, server: Server, token: String, ttl: Option<Duration>) -> Result<Session> {
        self.coordinator.resume(server, token, ttl)
    }

    /// Fetch the API client for `key`, rebuilding it if the token moved.
    ///
    /// Fetch one per operation; holding a handle across a suspension
    /// point that could span a token refresh defeats the cache's
    /// staleness check (prefer [`execute`](Self::execute), which does
    /// this for you).
    pub async fn client(&self, key: &ServerKey) -> Result<ClientHandle> {
        self.cache.get(key).await
    }

    /// Run one authenticated operation with the full retry/reauth
    /// protocol. See [`RequestExecutor::execute`].
    pub async fn execute<T, F, Fut>(&self, key: &ServerKey, operation: F) -> Result<T>
    where
        F: Fn(ClientHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.executor.execute(key, operation).await
    }

    /// Force a re-authentication for `key` (single-flight; concurrent
    /// callers share the outcome).
    pub async fn reauthenticate(&self, key: &ServerKey) -> Result<()> {
        self.coordinator.reauthenticate(key).await
    }

    /// Destroy the session and its cached clients; with `forget`, also
    /// discard the stored credential.
    pub async fn logout(&self, key: &ServerKey, forget: bool) -> Result<()> {
        self.coordinator.logout(key, forget).await
    }

    /// Snapshot of the current session for `key`, if connected.
    pub fn session(&self, key: &ServerKey) -> Option<Session> {
        self.sessions.current(key)
    }

    /// Observe session changes for `key`, if connected.
    pub fn subscribe(&self, key: &ServerKey) -> Option<watch::Receiver<Session>> {
        self.sessions.subscribe(key)
    }
}

/// Builder injecting the two external collaborators.
///
/// Defaults: an in-memory credential store (embedders that want remembered
/// logins across restarts inject
/// [`KeyringCredentialStore`](crate::credentials::KeyringCredentialStore))
/// and the HTTP login transport.
#[derive(Default)]
pub struct SessionManagerBuilder {
    credentials: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn LoginTransport>>,
}

impl SessionManagerBuilder {
    /// Use the given credential store.
    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Use the given login transport.
    pub fn transport(mut self, transport: Arc<dyn LoginTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wire the components together.
    pub fn build(self) -> Result<SessionManager> {
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                crate::transport::HttpLoginTransport::new()
                    .map_err(|e| ApiError::Configuration(e.to_string()))?,
            ),
        };

        let sessions = Arc::new(SessionState::new());
        let tokens = TokenProvider::new(Arc::clone(&sessions));
        let cache = Arc::new(ClientCache::new(Arc::clone(&sessions), tokens));
        let coordinator = AuthCoordinator::new(
            Arc::clone(&sessions),
            Arc::clone(&cache),
            credentials,
            transport,
        );
        let executor = RequestExecutor::new(Arc::clone(&cache), coordinator.clone());

        Ok(SessionManager {
            sessions,
            cache,
            coordinator,
            executor,
        })
    }
}
