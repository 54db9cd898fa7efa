//! machina-filecipher: streaming file ciphers for Machina protected data
//!
//! Two families share one session model (`init`, repeated `update` or
//! `read_block`, then `finish`):
//!
//! - **generic** 1.1 / 1.2 / 1.3: a JSON header followed by cipher frames.
//!   The reader selects the codec from the header's `version`, so callers
//!   never pass a version when decrypting.
//! - **csv** 1.0: a generic 1.2 stream carried as base64 text lines inside a
//!   quoted CSV field, behind a human-readable cover page.
//!
//! ```text
//! GenericOutput ──► header ──► Encoder::{V1_1,V1_2,V1_3} ──► sink
//! CsvOutput ──► GenericOutput<ByteQueue> ──► base64 lines ──► sink
//! ```
//!
//! Keys come from a [`machina_keys::KeyService`]. Version 1.3 calls it in the
//! middle of the stream at every rotation boundary, blocking the caller.
//! Everything is synchronous and single-session; use separate instances for
//! parallel work.

pub mod cipher;
pub mod codec;
pub mod csv;
pub mod error;
pub mod generic;
pub mod header;
pub mod queue;
pub mod scanner;

pub use cipher::{CsvFileCipher, FileCipher, GenericFileCipher};
pub use codec::Block;
pub use csv::{CoverPage, CsvInput, CsvOutput, StaticCoverPage};
pub use error::{ErrorKind, FileCipherError, Result};
pub use generic::{GenericInput, GenericOutput};
pub use header::{GenericHeader, GenericVersion, RotationHeader, RotationParams};
pub use queue::ByteQueue;
pub use scanner::{find_token, TokenScanner};
