//! Error taxonomy shared by the engine and every store accessor.
//!
//! Errors are classified by an explicit [`ErrorKind`], never by inspecting
//! message text. Retry/skip policies in `acadbatch-batch` decide what to do
//! with each kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure, used by retry and skip policies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset, pool timeout, statement timeout.
    DatabaseTransient,
    /// Deadlock or serialization failure reported by a store.
    DatabaseDeadlock,
    /// The message bus refused or could not accept a publish.
    MessageBusUnavailable,
    /// Reading or moving files under the managed storage root failed.
    FilesystemIo,
    /// A record could not be interpreted (bad value, broken reference shape).
    MalformedInput,
    /// A field the transform needs is absent on an otherwise valid record.
    MissingOptionalField,
    /// Misconfiguration; the job must abort immediately.
    Configuration,
    /// Anything no accessor classified explicitly.
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DatabaseTransient => "database_transient",
            ErrorKind::DatabaseDeadlock => "database_deadlock",
            ErrorKind::MessageBusUnavailable => "message_bus_unavailable",
            ErrorKind::FilesystemIo => "filesystem_io",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::MissingOptionalField => "missing_optional_field",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level error: a kind, a human-readable message and, for chunk
/// writes, the index of the offending item when the writer could tell.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BatchError {
    kind: ErrorKind,
    message: String,
    item_index: Option<usize>,
}

impl BatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            item_index: None,
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseTransient, msg)
    }

    pub fn deadlock(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseDeadlock, msg)
    }

    pub fn bus_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MessageBusUnavailable, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::FilesystemIo, msg)
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedInput, msg)
    }

    pub fn missing_field(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingOptionalField, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg)
    }

    pub fn unclassified(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified, msg)
    }

    /// Attach the position of the failing item inside a chunk.
    pub fn at_item(mut self, index: usize) -> Self {
        self.item_index = Some(index);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn item_index(&self) -> Option<usize> {
        self.item_index
    }
}

impl From<std::io::Error> for BatchError {
    fn from(err: std::io::Error) -> Self {
        BatchError::io(err.to_string())
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::malformed(err.to_string())
    }
}
