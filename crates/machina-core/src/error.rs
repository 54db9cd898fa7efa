use thiserror::Error;

pub type MachinaResult<T> = Result<T, MachinaError>;

#[derive(Debug, Error)]
pub enum MachinaError {
    #[error("config error: {0}")]
    Config(String),

    #[error("key already resolved for this session: {existing}")]
    KeyAlreadyResolved { existing: String },

    #[error("logging error: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
