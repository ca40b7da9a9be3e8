//! Store accessor errors.

use acadbatch_core::{BatchError, ErrorKind};

/// Failure reported by a store accessor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("deadlock detected: {0}")]
    Deadlock(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("filesystem error: {0}")]
    Io(String),
    #[error("invalid store configuration: {0}")]
    Misconfigured(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::DatabaseTransient,
            StoreError::Deadlock(_) => ErrorKind::DatabaseDeadlock,
            StoreError::NotFound { .. } | StoreError::Corrupt(_) => ErrorKind::MalformedInput,
            StoreError::Io(_) => ErrorKind::FilesystemIo,
            StoreError::Misconfigured(_) => ErrorKind::Configuration,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<StoreError> for BatchError {
    fn from(err: StoreError) -> Self {
        BatchError::new(err.kind(), err.to_string())
    }
}
