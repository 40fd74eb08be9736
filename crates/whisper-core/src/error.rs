use thiserror::Error;

pub type WhisperResult<T> = Result<T, WhisperError>;

#[derive(Debug, Error)]
pub enum WhisperError {
    #[error(transparent)]
    Crypto(#[from] whisper_crypto::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("limit exceeded: {0}")]
    Limit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
