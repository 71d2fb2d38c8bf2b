use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy surfaced to callers. Variants name failure *kinds*,
/// not internal mechanisms, so callers can match on them stably.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("operation failure: {0}")]
    OperationFailure(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("path invalid: {0}")]
    PathInvalid(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StorageFailure(e.to_string())
    }
}

impl From<bson::ser::Error> for Error {
    fn from(e: bson::ser::Error) -> Self {
        Error::StorageFailure(e.to_string())
    }
}

impl From<bson::de::Error> for Error {
    fn from(e: bson::de::Error) -> Self {
        Error::StorageFailure(e.to_string())
    }
}
