//! Error manager error types.

use thiserror::Error;

/// Result type for error manager operations.
pub type Result<T> = std::result::Result<T, ErrMgrError>;

/// Errors raised while accounting, recording or resolving load errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrMgrError {
    /// An error budget was driven below zero
    #[error("The number of {category} errors exceeds the threshold configured by `{key}`: '{threshold}'")]
    ThresholdExceeded {
        category: &'static str,
        key: &'static str,
        threshold: i64,
    },

    /// Row could not be encoded by the caller
    #[error("{0}")]
    Encode(String),

    /// Row-level error reported after its budget ran out
    #[error("{message}: The number of {category} errors exceeds the threshold configured by `{key}`: '{threshold}'")]
    RowThresholdExceeded {
        message: String,
        category: &'static str,
        key: &'static str,
        threshold: i64,
    },

    /// Persistence failure reported by the execution engine
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persistence failure that may succeed on retry
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Persisted row could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller-supplied resolution logic failed
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// Arguments do not line up
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Work was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// A worker task panicked
    #[error("Worker panic: {0}")]
    WorkerPanic(String),

    /// An error that could not be recorded because persistence failed as well
    #[error("{primary}; {secondary}")]
    Compound {
        primary: Box<ErrMgrError>,
        secondary: Box<ErrMgrError>,
    },
}

impl ErrMgrError {
    /// Returns `true` if retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrMgrError::TransientStorage(_))
    }

    /// Returns `true` if this error reports an exhausted budget.
    pub fn is_threshold_exceeded(&self) -> bool {
        matches!(
            self,
            ErrMgrError::ThresholdExceeded { .. } | ErrMgrError::RowThresholdExceeded { .. }
        )
    }

    /// Joins an error with the persistence failure that hid it.
    pub fn compound(primary: ErrMgrError, secondary: ErrMgrError) -> Self {
        ErrMgrError::Compound {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }
}

impl From<rusqlite::Error> for ErrMgrError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                ErrMgrError::TransientStorage(err.to_string())
            }
            _ => ErrMgrError::Storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_message_names_config_key() {
        let err = ErrMgrError::ThresholdExceeded {
            category: "conflict",
            key: "conflict.threshold",
            threshold: 5,
        };
        assert_eq!(
            err.to_string(),
            "The number of conflict errors exceeds the threshold configured by `conflict.threshold`: '5'"
        );
        assert!(err.is_threshold_exceeded());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_busy_sqlite_error_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(ErrMgrError::from(err).is_transient());

        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(matches!(ErrMgrError::from(err), ErrMgrError::Storage(_)));
    }

    #[test]
    fn test_compound_display() {
        let err = ErrMgrError::compound(
            ErrMgrError::Encode("bad row".to_string()),
            ErrMgrError::Storage("disk full".to_string()),
        );
        assert_eq!(err.to_string(), "bad row; Storage error: disk full");
    }
}
