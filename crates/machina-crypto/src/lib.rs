//! machina-crypto: leaf cipher primitives for Machina protected formats
//!
//! Both ciphers take a 256-bit data key and a 128-bit IV carried in the clear
//! next to the ciphertext:
//! ```text
//! AES-256-CTR : [16 bytes: IV][N bytes: ciphertext]
//! AES-256-GCM : [16 bytes: IV][N bytes: ciphertext][16 bytes: tag]
//! ```
//! GCM additional data is supplied by the caller (the file formats bind the key id).

pub mod counter;
pub mod error;
pub mod gcm;
pub mod random;

pub use counter::AesCtrCipher;
pub use error::CryptoError;
pub use gcm::AesGcmCipher;
pub use random::{generate_iv, generate_key_bytes};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the IV carried with every encrypted block (128-bit)
pub const IV_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
