//! The public request path: one authenticated operation with retry.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};
use vela_core::ServerKey;

use crate::cache::{ClientCache, ClientHandle};
use crate::coordinator::AuthCoordinator;
use crate::error::{ApiError, Result};

/// Wraps one logical operation with the retry/reauth/invalidation
/// protocol. This is the only surface higher-level repositories call;
/// they never construct or retain a client handle themselves.
pub struct RequestExecutor {
    cache: Arc<ClientCache>,
    coordinator: AuthCoordinator,
}

impl RequestExecutor {
    pub(crate) fn new(cache: Arc<ClientCache>, coordinator: AuthCoordinator) -> Self {
        Self { cache, coordinator }
    }

    /// Run one authenticated operation against `key`.
    ///
    /// The operation receives a freshly fetched [`ClientHandle`] and may
    /// be invoked a second time for the single retry, so it must not
    /// consume state across calls. A 401 drives the single-flight
    /// re-authentication and exactly one retry with a rebuilt client; if
    /// the retry is also rejected, or the re-authentication failed, the
    /// caller gets [`ApiError::Unauthenticated`] and nothing loops.
    /// Every non-auth failure is returned unmodified for the caller's own
    /// retry policy.
    pub async fn execute<T, F, Fut>(&self, key: &ServerKey, operation: F) -> Result<T>
    where
        F: Fn(ClientHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.cache.get(key).await?;
        let observed_version = client.token_version();

        match operation(client).await {
            Err(err) if err.requires_reauth() => {
                debug!(%key, "operation rejected, re-authenticating");
                if let Err(e) = self
                    .coordinator
                    .reauthenticate_if_stale(key, observed_version)
                    .await
                {
                    // The cause was logged once by the coordinator; every
                    // waiter surfaces the same terse outcome.
                    warn!(%key, error = %e, "re-authentication failed");
                    return Err(ApiError::Unauthenticated);
                }

                // Cheap: the coordinator already invalidated the entry,
                // so this builds a client at the new token version.
                let client = self.cache.get(key).await?;
                match operation(client).await {
                    Err(err) if err.requires_reauth() => Err(ApiError::Unauthenticated),
                    other => other,
                }
            }
            other => other,
        }
    }
}
