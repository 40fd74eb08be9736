//! Codec error taxonomy

use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key agreement produced a non-contributory shared secret")]
    InvalidKey,

    #[error("authentication failed: data is corrupted or was not encrypted with this key")]
    AuthenticationFailed,

    #[error("failed to obtain secure random bytes: {0}")]
    Random(#[source] rand::Error),

    #[error("premature end of data")]
    Truncated,

    #[error("invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("length {0} does not fit in a 4-byte length prefix")]
    LengthOverflow(u64),

    #[error("chunk frame of {len} bytes exceeds the maximum of {max}")]
    ChunkTooLarge { len: usize, max: usize },

    #[error("format violation: {0}")]
    FormatViolation(String),

    #[error("invalid attachment file name: {0:?}")]
    InvalidFileName(String),

    #[error("not a Whisper archive: bad header")]
    BadHeader,

    #[error("an archive needs at least one recipient")]
    NoRecipients,

    #[error("recipient {0} is listed more than once")]
    DuplicateRecipient(String),

    #[error("this identity is not a recipient of the archive")]
    NotARecipient,

    #[error("internal error: more than one wrapped key opened for this identity")]
    DuplicateKeyMatch,

    #[error("trailing data after the end of the payload stream")]
    TrailingData,

    #[error("I/O error: {0}")]
    Io(io::Error),
}

/// Coarse classification of [`Error`], used to pick user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The bytes are not a well-formed archive. Reject the file.
    Format,
    /// An AEAD tag did not verify: corrupted, or not encrypted with this key.
    Crypto,
    /// Expected outcome: the archive was not addressed to this identity.
    NotRecipient,
    /// Broken invariant; either a cryptographic break or a bug.
    Internal,
    /// Disk I/O or randomness failure.
    Resource,
    /// The caller violated an API contract.
    Usage,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadHeader
            | Self::Truncated
            | Self::InvalidUtf8(_)
            | Self::TrailingData
            | Self::ChunkTooLarge { .. }
            | Self::FormatViolation(_)
            | Self::InvalidFileName(_) => ErrorCategory::Format,
            Self::AuthenticationFailed => ErrorCategory::Crypto,
            Self::NotARecipient => ErrorCategory::NotRecipient,
            Self::DuplicateKeyMatch => ErrorCategory::Internal,
            Self::Io(_) | Self::Random(_) => ErrorCategory::Resource,
            Self::NoRecipients
            | Self::DuplicateRecipient(_)
            | Self::LengthOverflow(_)
            | Self::InvalidKeyEncoding(_)
            | Self::InvalidKeyLength { .. }
            | Self::InvalidKey => ErrorCategory::Usage,
        }
    }
}

// `StreamReader`/`StreamWriter` implement `io::Read`/`io::Write`, so codec
// errors cross those traits boxed inside an `io::Error`. Unbox them here.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            let kind = e.kind();
            return match e.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => *inner,
                Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
                None => Self::Io(kind.into()),
            };
        }
        Self::Io(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            other => {
                let kind = match other.category() {
                    ErrorCategory::Format | ErrorCategory::Crypto => io::ErrorKind::InvalidData,
                    ErrorCategory::Usage => io::ErrorKind::InvalidInput,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}
