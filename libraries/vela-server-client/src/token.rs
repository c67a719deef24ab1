//! Send-time token attachment.
//!
//! The one bug class this module exists to prevent: a client or request
//! built once with a token value baked in, then reused across a refresh
//! boundary. [`TokenProvider`] therefore reads [`SessionState`] on every
//! call and never caches a token value of its own.

use std::sync::Arc;

use vela_core::ServerKey;

use crate::session::SessionState;

/// Read path over [`SessionState`] that attaches the freshest token at
/// the moment a request is about to be sent.
#[derive(Clone)]
pub struct TokenProvider {
    sessions: Arc<SessionState>,
}

impl TokenProvider {
    pub(crate) fn new(sessions: Arc<SessionState>) -> Self {
        Self { sessions }
    }

    /// The current token for `key`, if any.
    pub fn token(&self, key: &ServerKey) -> Option<String> {
        self.sessions.current(key).and_then(|session| session.token)
    }

    /// Attach the current token as a bearer header.
    ///
    /// If no token exists the request is returned unmodified; the server's
    /// 401 then drives the unauthenticated classification rather than
    /// failing silently here.
    pub fn attach(&self, key: &ServerKey, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token(key) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Attach the current token as a query parameter, for endpoints that
    /// cannot take an auth header (e.g. media stream URLs). The parameter
    /// name is the caller's choice.
    pub fn attach_query(&self, key: &ServerKey, param: &str, url: &mut reqwest::Url) {
        if let Some(token) = self.token(key) {
            url.query_pairs_mut().append_pair(param, &token);
        }
    }
}
