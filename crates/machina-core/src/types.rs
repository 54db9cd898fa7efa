use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{MachinaError, MachinaResult};
use crate::KEY_SIZE;

/// Free-form request metadata forwarded to the key service (string -> string)
pub type Metadata = HashMap<String, String>;

/// Attributes requested on a key at creation time (name -> values)
pub type KeyAttributes = HashMap<String, Vec<String>>;

/// Metadata about a protected file, populated once from its parsed header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub is_encrypted: bool,
    pub cipher_family: String,
    pub cipher_version: String,
    pub key_id: String,
    pub server: String,
}

impl FileInfo {
    /// FileInfo for input that carries no recognisable protection header.
    pub fn unencrypted() -> Self {
        Self::default()
    }
}

/// A data key brokered by the key service. Zeroized on drop.
#[derive(Clone)]
pub struct Key {
    id: String,
    bytes: [u8; KEY_SIZE],
    origin: String,
}

impl Key {
    pub fn new(id: impl Into<String>, bytes: [u8; KEY_SIZE], origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bytes,
            origin: origin.into(),
        }
    }

    /// Build a key from a variable-length buffer (e.g. a decoded service response).
    pub fn from_slice(
        id: impl Into<String>,
        bytes: &[u8],
        origin: impl Into<String>,
    ) -> MachinaResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            MachinaError::Other(anyhow::anyhow!(
                "key material must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(id, bytes, origin))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Session context for an encryption.
///
/// Holds the resolved key (written at most once), the attributes to request
/// when the key is created, and request metadata for the key service.
#[derive(Debug, Clone, Default)]
pub struct EncryptAttributes {
    key: Option<Key>,
    pub key_attributes: KeyAttributes,
    pub metadata: Metadata,
}

impl EncryptAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a key the caller already holds; no key will be created.
    pub fn with_key(key: Key) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn with_key_attribute(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.key_attributes.insert(name.into(), values);
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Record the key resolved for this session. A second call is a contract violation.
    pub fn set_key(&mut self, key: Key) -> MachinaResult<()> {
        set_once(&mut self.key, key)
    }
}

/// Session context for a decryption.
#[derive(Debug, Clone, Default)]
pub struct DecryptAttributes {
    key: Option<Key>,
    pub metadata: Metadata,
}

impl DecryptAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Record the key resolved for this session. A second call is a contract violation.
    pub fn set_key(&mut self, key: Key) -> MachinaResult<()> {
        set_once(&mut self.key, key)
    }
}

fn set_once(slot: &mut Option<Key>, key: Key) -> MachinaResult<()> {
    if let Some(existing) = slot {
        return Err(MachinaError::KeyAlreadyResolved {
            existing: existing.id().to_string(),
        });
    }
    *slot = Some(key);
    Ok(())
}
