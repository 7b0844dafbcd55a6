#![deny(missing_docs)]
//! Sealvault keeps named secrets in portable vault files that only their
//! accessors can open, and protects each accessor's own secret key through
//! pluggable bindings (password or remote key management).

/// Audit log module.
pub mod audit;
/// Bootstrap config parsing and validation.
pub mod config;
/// Keys, envelopes, and encodings.
pub mod crypto;
/// Environment identities.
pub mod environment;
/// Error types.
pub mod error;
/// Secure filesystem helpers.
pub mod fs_secure;
/// Local credential caches.
pub mod keystore;
/// Shared runtime path layout.
pub mod paths;
/// Secret-binding providers.
pub mod providers;
/// Shared types.
pub mod types;
/// Vault files and access control.
pub mod vault;

pub use crypto::{KeyType, PublicKey, SealedSecret, SecretKey, WrappedKey};
pub use environment::{EnvType, Environment};
pub use error::{Result, SealError};
pub use providers::{EnvSecretBinding, ProviderRegistry};
pub use vault::{Vault, VaultItem, VaultOptions};
