//! Vela Player Server Client
//!
//! Session and token lifecycle core for the Vela Player server API.
//!
//! Every outgoing request carries a current credential, a 401 triggers
//! exactly one re-authentication attempt no matter how many requests fail
//! simultaneously, client instances are rebuilt (never reused with a
//! stale token) after a refresh, and credential persistence survives
//! cancellation of the caller that triggered it.
//!
//! # Features
//!
//! - **Session state**: one observable session per server, refreshed
//!   single-flight
//! - **Client cache**: expensive client construction amortized, staleness
//!   detected by token version
//! - **Request executor**: run one authenticated operation with the full
//!   retry/reauth protocol
//! - **Credential stores**: OS keychain or in-memory
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vela_core::{Server, ServerId};
//! use vela_server_client::{KeyringCredentialStore, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::builder()
//!         .credentials(Arc::new(KeyringCredentialStore::new("vela-player")))
//!         .build()?;
//!
//!     let server = Server::new(ServerId::generate(), "https://media.example.com", "alice")?;
//!     let key = server.key();
//!     let session = manager.connect(server, "secret").await?;
//!     println!("authenticated, token version {}", session.token_version);
//!
//!     let library: serde_json::Value = manager
//!         .execute(&key, |client| async move {
//!             let request = client.get("/api/library");
//!             client.json(request).await
//!         })
//!         .await?;
//!     println!("{library}");
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod coordinator;
mod credentials;
mod error;
mod executor;
mod manager;
mod session;
mod token;
mod transport;

// Re-export main types
pub use cache::{ClientCache, ClientHandle};
pub use coordinator::AuthCoordinator;
pub use credentials::{KeyringCredentialStore, MemoryCredentialStore};
pub use error::{ApiError, Result};
pub use executor::RequestExecutor;
pub use manager::{SessionManager, SessionManagerBuilder};
pub use session::{Session, SessionState};
pub use token::TokenProvider;
pub use transport::HttpLoginTransport;

// Re-export the collaborator seams so embedders need only this crate
pub use vela_core::{
    Credential, CredentialError, CredentialStore, LoginError, LoginTransport, Server, ServerId,
    ServerKey, TokenGrant,
};
