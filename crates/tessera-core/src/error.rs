use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("unable to queue notification because the processor was stopped")]
    Stopped,

    #[error("no projection required: already at or past the notified position")]
    NoProjectionRequired,

    #[error("failed to acquire projection lock")]
    FailedToLock,

    #[error("projection {projection} was previously locked and never released")]
    PreviouslyLocked { projection: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dispatcher was already started")]
    AlreadyStarted,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("stream already exists: {0}")]
    StreamExistsAlready(String),

    #[error("unknown stream: {0}")]
    StreamNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TesseraError {
    /// Whether the error means "nothing to do" rather than a failure
    pub fn is_benign(&self) -> bool {
        matches!(self, TesseraError::NoProjectionRequired)
    }

    /// Whether backing off and trying again may succeed
    ///
    /// `PreviouslyLocked` is not transient: a stuck projection stays
    /// stuck until an operator clears it.
    pub fn is_transient(&self) -> bool {
        matches!(self, TesseraError::FailedToLock | TesseraError::Storage(_))
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;
