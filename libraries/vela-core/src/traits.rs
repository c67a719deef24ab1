/// Collaborator traits for the session core
use async_trait::async_trait;

use crate::error::{CredentialError, LoginError};
use crate::types::{Credential, Server, ServerKey, TokenGrant};

/// Encrypted persistence of one credential per server identity.
///
/// Implementations own the encryption; the core reads and writes plaintext
/// through this interface and never inspects what is at rest.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the stored credential for `server`/`username`, if any.
    async fn get(
        &self,
        server: &ServerKey,
        username: &str,
    ) -> Result<Option<Credential>, CredentialError>;

    /// Persist a credential.
    ///
    /// Contract: the write must complete even when the caller's task is
    /// cancelled mid-call. Implementations run the write on an execution
    /// unit whose lifetime is not tied to the caller (e.g. the blocking
    /// pool); the coordinator additionally shields its own call site.
    async fn put(
        &self,
        server: &ServerKey,
        username: &str,
        password: &str,
    ) -> Result<(), CredentialError>;

    /// Remove the stored credential, if any.
    async fn clear(&self, server: &ServerKey, username: &str) -> Result<(), CredentialError>;
}

/// The login exchange, the only network dependency of the auth
/// coordinator. Swappable for testing.
#[async_trait]
pub trait LoginTransport: Send + Sync {
    /// Exchange a username/password pair for a token.
    ///
    /// Implementations classify failures structurally:
    /// [`LoginError::InvalidCredentials`] only for a 401/403 answer from
    /// the login endpoint itself, transient variants for everything else.
    async fn login(&self, server: &Server, password: &str) -> Result<TokenGrant, LoginError>;
}
