//! Error types for StashDB core.

use stashdb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in StashDB core operations.
///
/// Platform failures are folded into these classes by
/// [`CoreError::from_storage`]. Only [`CoreError::Conflict`] is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The database could not be opened.
    #[error("connection failed: {message}")]
    Connection {
        /// Platform error name.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// An upgrade is waiting for other connections to close.
    #[error("database upgrade blocked: {message}")]
    Blocked {
        /// Description of the blocking condition.
        message: String,
    },

    /// A collection or record does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what is missing.
        message: String,
    },

    /// The connection was invalidated, typically by a newer schema version
    /// opened from another context.
    #[error("version conflict ({name}): {message}")]
    Conflict {
        /// Platform error name.
        name: String,
        /// Description of the conflict.
        message: String,
    },

    /// A key or value was rejected.
    #[error("validation failed ({name}): {message}")]
    Validation {
        /// Platform error name.
        name: String,
        /// Description of the rejection.
        message: String,
    },

    /// Any other platform failure.
    #[error("storage error ({name}): {message}")]
    Storage {
        /// Platform error name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Classifies a platform error raised by a data request.
    #[must_use]
    pub fn from_storage(err: StorageError) -> Self {
        let name = err.name().to_string();
        let message = err.message();
        if is_conflict(&err) {
            return Self::Conflict { name, message };
        }
        match err {
            StorageError::Constraint(_) | StorageError::Data(_) => Self::Validation { name, message },
            StorageError::NotFound(_) => Self::NotFound { message },
            _ => Self::Storage { name, message },
        }
    }

    /// Classifies a platform error raised while opening the database.
    ///
    /// Conflict-class errors stay retryable; everything else is a
    /// connection failure.
    #[must_use]
    pub fn from_open(err: StorageError) -> Self {
        if is_conflict(&err) {
            return Self::from_storage(err);
        }
        Self::Connection {
            name: err.name().to_string(),
            message: err.message(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a validation error raised by the core itself.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            name: "ValidationError".into(),
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed after reconnecting.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns the platform error name, if the error came from the platform.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Connection { name, .. }
            | Self::Conflict { name, .. }
            | Self::Validation { name, .. }
            | Self::Storage { name, .. } => Some(name),
            Self::Blocked { .. } | Self::NotFound { .. } => None,
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        Self::from_storage(err)
    }
}

fn is_conflict(err: &StorageError) -> bool {
    if matches!(
        err,
        StorageError::InvalidState(_) | StorageError::Version { .. } | StorageError::TransactionInactive(_)
    ) {
        return true;
    }
    let message = err.message().to_lowercase();
    message.contains("version") || message.contains("connection")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidated_connections_are_conflicts() {
        let err = CoreError::from(StorageError::InvalidState("closing".into()));
        assert!(err.is_conflict());
        assert_eq!(err.name(), Some("InvalidStateError"));

        let err = CoreError::from(StorageError::Version {
            requested: 1,
            existing: 2,
        });
        assert!(err.is_conflict());

        let err = CoreError::from(StorageError::TransactionInactive("done".into()));
        assert!(err.is_conflict());
    }

    #[test]
    fn messages_mentioning_connection_are_conflicts() {
        let err = CoreError::from(StorageError::Aborted("the connection was reset".into()));
        assert!(err.is_conflict());
        let err = CoreError::from(StorageError::Io("schema Version skew".into()));
        assert!(err.is_conflict());
    }

    #[test]
    fn constraint_and_data_are_validation() {
        assert!(matches!(
            CoreError::from(StorageError::Constraint("dup".into())),
            CoreError::Validation { .. }
        ));
        assert!(matches!(
            CoreError::from(StorageError::Data("bad key".into())),
            CoreError::Validation { .. }
        ));
    }

    #[test]
    fn not_found_and_other_failures() {
        assert!(matches!(
            CoreError::from(StorageError::NotFound("store".into())),
            CoreError::NotFound { .. }
        ));
        let err = CoreError::from(StorageError::Io("disk full".into()));
        assert_eq!(
            err,
            CoreError::Storage {
                name: "IoError".into(),
                message: "disk full".into()
            }
        );
    }

    #[test]
    fn open_failures_are_connection_errors_unless_conflicts() {
        assert!(matches!(
            CoreError::from_open(StorageError::Locked("held".into())),
            CoreError::Connection { .. }
        ));
        assert!(CoreError::from_open(StorageError::Version {
            requested: 1,
            existing: 3
        })
        .is_conflict());
    }
}
