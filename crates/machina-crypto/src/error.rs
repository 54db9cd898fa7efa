use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid IV length: {actual} bytes (expected {expected})")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("ciphertext too short: {actual} bytes (minimum {minimum})")]
    CiphertextTooShort { minimum: usize, actual: usize },

    #[error("encryption failed")]
    EncryptionFailure,

    /// Wrong key, wrong additional data, or tampered ciphertext/tag.
    #[error("authentication failed: invalid key, corrupted data, or mismatched key id")]
    AuthenticationFailure,
}
