//! machina-keys: key resolution for protected-data sessions
//!
//! File ciphers never talk HTTP themselves. They resolve keys through the
//! `KeyService` capability:
//!   - `create_key` when an encryption session (or a 1.3 rotation) needs a fresh key
//!   - `fetch_key` when a decryption session (or a 1.3 rotation) names an existing key
//!
//! Both calls are synchronous and block the calling thread for as long as the
//! implementation needs (typically one network round trip). Wrap a service in
//! `CachingKeyService` and `prewarm` it to take rotation fetches off the network.

pub mod cache;
pub mod memory;

pub use cache::CachingKeyService;
pub use memory::MemoryKeyService;

use machina_core::{Key, KeyAttributes, Metadata};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyServiceError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key request denied: {0}")]
    Denied(String),

    #[error("key service transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Broker for data keys. Implementations must be usable from any thread.
pub trait KeyService: Send + Sync {
    /// Base URL recorded in protected-file headers as `server`.
    fn server(&self) -> &str;

    /// Create a new key carrying `attributes`.
    fn create_key(
        &self,
        attributes: &KeyAttributes,
        metadata: &Metadata,
    ) -> Result<Key, KeyServiceError>;

    /// Fetch an existing key by id.
    fn fetch_key(&self, id: &str, metadata: &Metadata) -> Result<Key, KeyServiceError>;
}

impl<S: KeyService + ?Sized> KeyService for std::sync::Arc<S> {
    fn server(&self) -> &str {
        (**self).server()
    }

    fn create_key(
        &self,
        attributes: &KeyAttributes,
        metadata: &Metadata,
    ) -> Result<Key, KeyServiceError> {
        (**self).create_key(attributes, metadata)
    }

    fn fetch_key(&self, id: &str, metadata: &Metadata) -> Result<Key, KeyServiceError> {
        (**self).fetch_key(id, metadata)
    }
}
