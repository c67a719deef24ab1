//! Observable per-server session state.
//!
//! [`SessionState`] is the single source of truth for "what token do we
//! currently have for server S, and are we mid-refresh". Reads are
//! snapshots and never block; every mutation goes through
//! `begin_authenticating`, `commit` or `fail`, which the auth coordinator
//! alone is allowed to call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;
use vela_core::{Server, ServerKey};

/// Buffer before expiry at which a token should be refreshed proactively
/// (for callers that poll [`Session::needs_refresh`]).
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Snapshot of one server's authentication session.
///
/// Cheap to clone; holding one across a refresh is safe because staleness
/// is detected by `token_version` comparison, never by pointer identity.
#[derive(Debug, Clone)]
pub struct Session {
    /// The server this session belongs to
    pub server: Server,
    /// Current access token, if authenticated
    pub token: Option<String>,
    /// Bumped on every committed token; cached clients compare against it
    pub token_version: u64,
    /// When the current token was issued
    pub issued_at: Option<DateTime<Utc>>,
    /// Token validity, if the server reported one
    pub ttl: Option<Duration>,
    /// True while a (re)authentication is in flight for this server
    pub authenticating: bool,
}

impl Session {
    fn new(server: Server) -> Self {
        Self {
            server,
            token: None,
            token_version: 0,
            issued_at: None,
            ttl: None,
            authenticating: false,
        }
    }

    /// Check whether the token has outlived its reported validity.
    pub fn is_expired(&self) -> bool {
        match (self.issued_at, self.ttl) {
            (Some(issued), Some(ttl)) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => Utc::now() > issued + ttl,
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Check if the token will expire soon and should be refreshed.
    pub fn needs_refresh(&self) -> bool {
        match (self.issued_at, self.ttl) {
            (Some(issued), Some(ttl)) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => {
                    Utc::now() > issued + ttl - chrono::Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES)
                }
                Err(_) => false,
            },
            _ => false,
        }
    }
}

/// Holds one observable [`Session`] per connected server.
///
/// Each session lives in a `tokio::sync::watch` channel: reads borrow the
/// current value, waiters await `changed()`, and `send_modify` serializes
/// writers per server. The map lock is only held for entry lookup, never
/// across an await, so independent servers refresh concurrently.
pub struct SessionState {
    entries: Mutex<HashMap<ServerKey, Arc<watch::Sender<Session>>>>,
}

impl SessionState {
    /// Create an empty session registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, key: &ServerKey) -> Option<Arc<watch::Sender<Session>>> {
        self.entries
            .lock()
            .expect("session map lock poisoned")
            .get(key)
            .cloned()
    }

    /// Create the session entry for `server` if absent.
    ///
    /// Returns whether a new session was created; an existing session is
    /// left untouched (sessions are destroyed only by [`remove`](Self::remove)).
    pub fn register(&self, server: Server) -> bool {
        let key = server.key();
        let mut entries = self.entries.lock().expect("session map lock poisoned");
        if entries.contains_key(&key) {
            return false;
        }
        let (tx, _rx) = watch::channel(Session::new(server));
        entries.insert(key.clone(), Arc::new(tx));
        debug!(%key, "session registered");
        true
    }

    /// Destroy the session for `key`. Waiters on its channel observe the
    /// sender closing.
    pub fn remove(&self, key: &ServerKey) -> bool {
        let removed = self
            .entries
            .lock()
            .expect("session map lock poisoned")
            .remove(key)
            .is_some();
        if removed {
            debug!(%key, "session removed");
        }
        removed
    }

    /// Snapshot of the current session for `key`. Never blocks.
    pub fn current(&self, key: &ServerKey) -> Option<Session> {
        self.sender(key).map(|tx| tx.borrow().clone())
    }

    /// Observe session changes for `key`.
    pub fn subscribe(&self, key: &ServerKey) -> Option<watch::Receiver<Session>> {
        self.sender(key).map(|tx| tx.subscribe())
    }

    /// Atomically claim the right to authenticate `key`.
    ///
    /// Returns `Some(true)` iff the flag was clear and this caller set it;
    /// `Some(false)` when another caller is already authenticating, and
    /// `None` for an unknown server.
    pub(crate) fn begin_authenticating(&self, key: &ServerKey) -> Option<bool> {
        let tx = self.sender(key)?;
        let mut won = false;
        tx.send_if_modified(|session| {
            if session.authenticating {
                false
            } else {
                session.authenticating = true;
                won = true;
                true
            }
        });
        Some(won)
    }

    /// Store a new token, bump the token version, clear the
    /// authenticating flag, and notify observers.
    pub(crate) fn commit(&self, key: &ServerKey, token: String, ttl: Option<Duration>) {
        if let Some(tx) = self.sender(key) {
            let mut version = 0;
            tx.send_modify(|session| {
                session.token = Some(token);
                session.token_version += 1;
                session.issued_at = Some(Utc::now());
                session.ttl = ttl;
                session.authenticating = false;
                version = session.token_version;
            });
            debug!(%key, version, "session token committed");
        }
    }

    /// Clear the authenticating flag without touching the token (the
    /// attempt failed) and notify observers so waiters stop waiting.
    pub(crate) fn fail(&self, key: &ServerKey) {
        if let Some(tx) = self.sender(key) {
            tx.send_if_modified(|session| {
                if session.authenticating {
                    session.authenticating = false;
                    true
                } else {
                    false
                }
            });
            debug!(%key, "authentication attempt marked failed");
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
