//! Single-flight (re)authentication.
//!
//! [`AuthCoordinator`] is the only component that writes to
//! [`SessionState`]. At most one login exchange is in flight per server;
//! concurrent callers either win the begin-authenticating CAS or wait for
//! the winner's outcome on the session's watch channel. The exchange
//! itself runs in a spawned task, so a caller that stops awaiting (a UI
//! navigation cancelling its scope) can neither strand the other waiters
//! nor lose the credential write.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use vela_core::{CredentialStore, LoginTransport, Server, ServerKey};

use crate::cache::ClientCache;
use crate::error::{ApiError, Result};
use crate::session::{Session, SessionState};

/// Where the password for an exchange comes from. Determines the
/// credential-retention policy on rejection: only a *stored* password
/// proven wrong by the server is discarded.
enum PasswordSource {
    Provided(String),
    Stored,
}

/// Drives the single-flight re-authentication state machine:
/// `Idle → Authenticating → Idle(success) | Idle(failure)`.
#[derive(Clone)]
pub struct AuthCoordinator {
    sessions: Arc<SessionState>,
    cache: Arc<ClientCache>,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn LoginTransport>,
}

impl AuthCoordinator {
    pub(crate) fn new(
        sessions: Arc<SessionState>,
        cache: Arc<ClientCache>,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn LoginTransport>,
    ) -> Self {
        Self {
            sessions,
            cache,
            credentials,
            transport,
        }
    }

    /// First login for `server` with an explicitly supplied password.
    ///
    /// Registers the session if needed, performs the exchange, and
    /// remembers the credential on success. Single-flight with any other
    /// login or reauthentication for the same server.
    pub async fn login(&self, server: Server, password: &str) -> Result<Session> {
        let key = server.key();
        self.sessions.register(server);
        let session = self.current(&key)?;

        let result = if self.begin(&key)? {
            let this = self.clone();
            let task_key = key.clone();
            let password = password.to_string();
            let task = tokio::spawn(async move {
                this.exchange(&task_key, PasswordSource::Provided(password))
                    .await
            });
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(%key, error = %e, "login task died");
                    // Unblock any waiters the dead task left behind
                    self.sessions.fail(&key);
                    Err(ApiError::Unauthenticated)
                }
            }
        } else {
            self.wait_for_winner(&key, session.token_version).await
        };

        result?;
        self.current(&key)
    }

    /// Adopt a previously persisted token without a fresh login.
    pub fn resume(&self, server: Server, token: String, ttl: Option<Duration>) -> Result<Session> {
        let key = server.key();
        self.sessions.register(server);
        self.sessions.commit(&key, token, ttl);
        debug!(%key, "session resumed from persisted token");
        self.current(&key)
    }

    /// Re-authenticate `key` using the stored credential.
    ///
    /// Equivalent to [`reauthenticate_if_stale`](Self::reauthenticate_if_stale)
    /// observed at the current token version, i.e. an unconditional
    /// attempt (or a wait on one already in flight).
    pub async fn reauthenticate(&self, key: &ServerKey) -> Result<()> {
        let session = self.current(key)?;
        self.reauthenticate_if_stale(key, session.token_version).await
    }

    /// Re-authenticate `key` unless the token has already moved past
    /// `observed_version`, the version the caller's rejected credential
    /// was issued at. A concurrent caller may have refreshed it first; in
    /// that case there is nothing to do and no login call is made.
    pub async fn reauthenticate_if_stale(
        &self,
        key: &ServerKey,
        observed_version: u64,
    ) -> Result<()> {
        let session = self.current(key)?;
        if session.token_version != observed_version && session.token.is_some() {
            debug!(%key, "token already refreshed by a concurrent caller");
            return Ok(());
        }

        if self.begin(key)? {
            let this = self.clone();
            let task_key = key.clone();
            let task =
                tokio::spawn(async move { this.exchange(&task_key, PasswordSource::Stored).await });
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(%key, error = %e, "re-authentication task died");
                    self.sessions.fail(key);
                    Err(ApiError::Unauthenticated)
                }
            }
        } else {
            debug!(%key, "re-authentication already in flight, waiting");
            self.wait_for_winner(key, observed_version).await
        }
    }

    /// Destroy the session and its cached clients. With `forget`, also
    /// discard the stored credential ("disable remember login").
    pub async fn logout(&self, key: &ServerKey, forget: bool) -> Result<()> {
        let Some(session) = self.sessions.current(key) else {
            return Ok(());
        };
        let username = session.server.username().to_string();

        self.cache.invalidate(key).await;
        self.sessions.remove(key);
        if forget {
            self.credentials.clear(key, &username).await?;
        }
        info!(%key, forget, "logged out");
        Ok(())
    }

    fn current(&self, key: &ServerKey) -> Result<Session> {
        self.sessions
            .current(key)
            .ok_or_else(|| ApiError::UnknownServer(key.clone()))
    }

    fn begin(&self, key: &ServerKey) -> Result<bool> {
        self.sessions
            .begin_authenticating(key)
            .ok_or_else(|| ApiError::UnknownServer(key.clone()))
    }

    /// Wait until the in-flight exchange finishes, then report success iff
    /// the token version advanced past `observed_version`. The winner's
    /// failure was already logged once on its side; waiters surface the
    /// terse variant so a failed reauth does not prompt once per caller.
    async fn wait_for_winner(&self, key: &ServerKey, observed_version: u64) -> Result<()> {
        let mut rx = self
            .sessions
            .subscribe(key)
            .ok_or_else(|| ApiError::UnknownServer(key.clone()))?;

        loop {
            let (authenticating, version) = {
                let session = rx.borrow_and_update();
                (session.authenticating, session.token_version)
            };
            if !authenticating {
                return if version != observed_version {
                    Ok(())
                } else {
                    Err(ApiError::Unauthenticated)
                };
            }
            rx.changed()
                .await
                .map_err(|_| ApiError::UnknownServer(key.clone()))?;
        }
    }

    /// The exchange itself. Runs inside a spawned task: callers that
    /// cancel stop awaiting it, but commit/fail and the credential write
    /// still happen, so every waiter observes a correct outcome.
    ///
    /// Invariant: every return path below clears the authenticating flag,
    /// via either `commit` or `fail`.
    async fn exchange(&self, key: &ServerKey, source: PasswordSource) -> Result<()> {
        let session = match self.sessions.current(key) {
            Some(session) => session,
            None => return Err(ApiError::UnknownServer(key.clone())),
        };
        let server = session.server.clone();

        let (password, from_store) = match source {
            PasswordSource::Provided(password) => (password, false),
            PasswordSource::Stored => {
                match self.credentials.get(key, server.username()).await {
                    Ok(Some(credential)) => (credential.password, true),
                    Ok(None) => {
                        debug!(%key, "no stored credentials to re-authenticate with");
                        self.sessions.fail(key);
                        return Err(ApiError::NoCredentials(key.clone()));
                    }
                    Err(e) => {
                        self.sessions.fail(key);
                        return Err(ApiError::CredentialStore(e));
                    }
                }
            }
        };

        match self.transport.login(&server, &password).await {
            Ok(grant) => {
                // Persist before commit so a crash between the two leaves
                // a recoverable credential rather than an orphaned token.
                // A failed save is not a failed login; the session is
                // still usable for this process lifetime.
                if let Err(e) = self
                    .credentials
                    .put(key, server.username(), &password)
                    .await
                {
                    warn!(%key, error = %e, "failed to persist credential");
                }
                self.sessions.commit(key, grant.token, grant.ttl);
                self.cache.invalidate(key).await;
                info!(%key, "authentication succeeded");
                Ok(())
            }
            Err(err) if err.is_invalid_credentials() => {
                if from_store {
                    // The server proved the saved password wrong; this is
                    // the only path that discards it.
                    if let Err(e) = self.credentials.clear(key, server.username()).await {
                        warn!(%key, error = %e, "failed to clear rejected credential");
                    }
                }
                self.sessions.fail(key);
                warn!(%key, "authentication rejected: invalid credentials");
                Err(ApiError::Unauthenticated)
            }
            Err(err) => {
                // Transient failure: keep the stored password so a later
                // attempt can retry with it.
                self.sessions.fail(key);
                warn!(%key, error = %err, "authentication attempt failed");
                Err(err.into())
            }
        }
    }
}
