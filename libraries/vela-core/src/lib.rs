//! Vela Player Core
//!
//! Platform-agnostic types, collaborator traits, and error handling shared
//! by the Vela Player client crates.
//!
//! This crate defines:
//! - **Identity types**: [`ServerId`], [`Server`], [`ServerKey`]
//! - **Collaborator traits**: [`CredentialStore`], [`LoginTransport`]
//! - **Seam errors**: [`ConfigError`], [`CredentialError`], [`LoginError`]
//!
//! # Example
//!
//! ```rust
//! use vela_core::{Server, ServerId};
//!
//! let server = Server::new(
//!     ServerId::generate(),
//!     "https://media.example.com",
//!     "alice",
//! )?;
//!
//! assert_eq!(server.base_url(), "https://media.example.com");
//! # Ok::<(), vela_core::ConfigError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{ConfigError, CredentialError, LoginError};
pub use traits::{CredentialStore, LoginTransport};
pub use types::{Credential, Server, ServerId, ServerKey, TokenGrant};
