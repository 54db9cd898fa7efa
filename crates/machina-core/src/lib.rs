//! machina-core: shared types and ambient plumbing for the Machina SDK
//!
//! - `types`: session data model (`FileInfo`, `Key`, encrypt/decrypt attributes)
//! - `config`: TOML configuration schema
//! - `error`: umbrella error type
//! - `logging`: `tracing-subscriber` setup

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{MachinaError, MachinaResult};
pub use types::{DecryptAttributes, EncryptAttributes, FileInfo, Key, KeyAttributes, Metadata};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;
