use machina_core::MachinaError;
use machina_crypto::CryptoError;
use machina_keys::KeyServiceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FileCipherError>;

#[derive(Debug, Error)]
pub enum FileCipherError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no header found within {limit} bytes")]
    NoHeaderFound { limit: usize },

    #[error("unexpected end of stream while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("unsupported cipher family/version: {family} {version}")]
    UnsupportedVersion { family: String, version: String },

    #[error("header is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("malformed frame {frame}: {reason}")]
    MalformedFrame { frame: u64, reason: String },

    #[error("truncated frame {frame}: expected {expected} bytes, got {actual}")]
    TruncatedFrame { frame: u64, expected: usize, actual: usize },

    #[error("session used before init")]
    NotInitialized,

    #[error("session already initialized")]
    AlreadyInitialized,

    #[error("session already finalized")]
    AlreadyFinalized,

    #[error("plaintext unavailable: session was opened without a key service")]
    PlaintextUnavailable,

    #[error("key service error: {0}")]
    KeyService(#[from] KeyServiceError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Core(#[from] MachinaError),
}

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Short reads/writes, unexpected EOF
    Stream,
    /// Missing or oversized header, bad sentinels or lengths, unknown version
    Format,
    /// Key fetch failure or authentication mismatch (possible tampering)
    Crypto,
    /// Operations called out of order
    Contract,
}

impl FileCipherError {
    pub fn kind(&self) -> ErrorKind {
        use FileCipherError::*;
        match self {
            Io(_) | UnexpectedEof { .. } | TruncatedFrame { .. } => ErrorKind::Stream,
            NoHeaderFound { .. }
            | UnsupportedVersion { .. }
            | MissingField(_)
            | MalformedHeader(_)
            | MalformedFrame { .. } => ErrorKind::Format,
            KeyService(_) | Crypto(_) => ErrorKind::Crypto,
            NotInitialized | AlreadyInitialized | AlreadyFinalized | PlaintextUnavailable => {
                ErrorKind::Contract
            }
            Core(MachinaError::KeyAlreadyResolved { .. }) => ErrorKind::Contract,
            Core(MachinaError::Io(_)) => ErrorKind::Stream,
            Core(_) => ErrorKind::Format,
        }
    }
}

impl From<FileCipherError> for std::io::Error {
    fn from(e: FileCipherError) -> Self {
        if let FileCipherError::Io(io) = e {
            return io;
        }
        let kind = match e {
            FileCipherError::UnexpectedEof { .. } => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(FileCipherError::NotInitialized.kind(), ErrorKind::Contract);
        assert_eq!(
            FileCipherError::NoHeaderFound { limit: 10 }.kind(),
            ErrorKind::Format
        );
        assert_eq!(
            FileCipherError::Crypto(CryptoError::AuthenticationFailure).kind(),
            ErrorKind::Crypto
        );
        assert_eq!(
            FileCipherError::UnexpectedEof { context: "frame" }.kind(),
            ErrorKind::Stream
        );
    }

    #[test]
    fn test_into_io_error() {
        let io: std::io::Error = FileCipherError::UnexpectedEof { context: "x" }.into();
        assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
        let io: std::io::Error = FileCipherError::PlaintextUnavailable.into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
    }
}
