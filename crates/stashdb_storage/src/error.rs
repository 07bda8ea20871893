//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Every variant carries a stable [`name`](StorageError::name) that callers
/// use to classify failures without matching on message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A uniqueness constraint was violated (e.g. `add` on an existing key).
    #[error("ConstraintError: {0}")]
    Constraint(String),

    /// A named object store or database does not exist.
    #[error("NotFoundError: {0}")]
    NotFound(String),

    /// The connection or transaction is in a state that forbids the request.
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    /// An open request asked for a version lower than the stored one.
    #[error("VersionError: the requested version ({requested}) is less than the existing version ({existing})")]
    Version {
        /// The requested version.
        requested: u32,
        /// The version currently stored.
        existing: u32,
    },

    /// A key or value was not acceptable for the target store.
    #[error("DataError: {0}")]
    Data(String),

    /// A write was attempted inside a read-only transaction.
    #[error("ReadOnlyError: {0}")]
    ReadOnly(String),

    /// The transaction is no longer active.
    #[error("TransactionInactiveError: {0}")]
    TransactionInactive(String),

    /// The request was aborted before it completed.
    #[error("AbortError: {0}")]
    Aborted(String),

    /// Another process holds the database file.
    #[error("LockedError: {0}")]
    Locked(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The persisted log is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns the stable error name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constraint(_) => "ConstraintError",
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::Version { .. } => "VersionError",
            Self::Data(_) => "DataError",
            Self::ReadOnly(_) => "ReadOnlyError",
            Self::TransactionInactive(_) => "TransactionInactiveError",
            Self::Aborted(_) => "AbortError",
            Self::Locked(_) => "LockedError",
            Self::Io(_) => "IoError",
            Self::Corrupted(_) => "CorruptedError",
        }
    }

    /// Returns the message without the error name prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Constraint(m)
            | Self::NotFound(m)
            | Self::InvalidState(m)
            | Self::Data(m)
            | Self::ReadOnly(m)
            | Self::TransactionInactive(m)
            | Self::Aborted(m)
            | Self::Locked(m)
            | Self::Io(m)
            | Self::Corrupted(m) => m.clone(),
            Self::Version {
                requested,
                existing,
            } => format!(
                "the requested version ({requested}) is less than the existing version ({existing})"
            ),
        }
    }

    /// Creates the error returned for requests on a closed connection.
    pub(crate) fn connection_closing() -> Self {
        Self::InvalidState("the database connection is closing".into())
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
