//! Credential store adapters.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use vela_core::{Credential, CredentialError, CredentialStore, ServerKey};

/// In-memory credential store for tests and for embedders that own
/// persistence themselves. Writes are synchronous, so they trivially
/// complete under caller cancellation.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<(ServerKey, String), String>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(
        &self,
        server: &ServerKey,
        username: &str,
    ) -> Result<Option<Credential>, CredentialError> {
        let entries = self.entries.lock().expect("credential map lock poisoned");
        Ok(entries
            .get(&(server.clone(), username.to_string()))
            .map(|password| Credential {
                username: username.to_string(),
                password: password.clone(),
            }))
    }

    async fn put(
        &self,
        server: &ServerKey,
        username: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().expect("credential map lock poisoned");
        entries.insert(
            (server.clone(), username.to_string()),
            password.to_string(),
        );
        Ok(())
    }

    async fn clear(&self, server: &ServerKey, username: &str) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().expect("credential map lock poisoned");
        entries.remove(&(server.clone(), username.to_string()));
        Ok(())
    }
}

/// Credential store backed by the OS keychain.
///
/// Keychain calls are blocking, so every operation runs on the blocking
/// pool. A `put` started before its caller was cancelled therefore runs
/// to completion, satisfying the store contract.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    /// Create a store writing under the given keychain service name.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn account(server: &ServerKey, username: &str) -> String {
        format!("{username}@{server}")
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn get(
        &self,
        server: &ServerKey,
        username: &str,
    ) -> Result<Option<Credential>, CredentialError> {
        let service = self.service.clone();
        let account = Self::account(server, username);
        let username = username.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| CredentialError::Backend(e.to_string()))?;
            match entry.get_password() {
                Ok(password) => Ok(Some(Credential { username, password })),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(CredentialError::Backend(e.to_string())),
            }
        })
        .await
        .map_err(|e| CredentialError::Backend(format!("keychain task failed: {e}")))?
    }

    async fn put(
        &self,
        server: &ServerKey,
        username: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        let service = self.service.clone();
        let account = Self::account(server, username);
        let password = password.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| CredentialError::Backend(e.to_string()))?;
            entry
                .set_password(&password)
                .map_err(|e| CredentialError::Backend(e.to_string()))?;
            debug!(account = %account, "credential persisted to keychain");
            Ok(())
        })
        .await
        .map_err(|e| CredentialError::Backend(format!("keychain task failed: {e}")))?
    }

    async fn clear(&self, server: &ServerKey, username: &str) -> Result<(), CredentialError> {
        let service = self.service.clone();
        let account = Self::account(server, username);

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| CredentialError::Backend(e.to_string()))?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {
                    debug!(account = %account, "credential cleared from keychain");
                    Ok(())
                }
                Err(e) => Err(CredentialError::Backend(e.to_string())),
            }
        })
        .await
        .map_err(|e| CredentialError::Backend(format!("keychain task failed: {e}")))?
    }
}
