//! Error types for the checkpointing engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in checkpoint and recovery operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dcp_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rejected input. Nothing was modified.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected input.
        message: String,
    },

    /// A variable id or dataset does not fit the addressable range.
    #[error("overflow: {message}")]
    Overflow {
        /// Description of the overflowing quantity.
        message: String,
    },

    /// Persisted state references a variable that is not registered.
    #[error("recovery mismatch: {message}")]
    RecoveryMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// Metadata or layered file content is truncated or malformed.
    #[error("invalid checkpoint format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// An error raised by a public operation on a specific rank.
    #[error("rank {rank}: {operation}: {source}")]
    Rank {
        /// Rank that raised the error.
        rank: u32,
        /// Operation that failed.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an overflow error.
    pub fn overflow(message: impl Into<String>) -> Self {
        Self::Overflow {
            message: message.into(),
        }
    }

    /// Creates a recovery mismatch error.
    pub fn recovery_mismatch(message: impl Into<String>) -> Self {
        Self::RecoveryMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Attaches the originating rank and operation.
    #[must_use]
    pub fn at(self, rank: u32, operation: &'static str) -> Self {
        match self {
            already @ Self::Rank { .. } => already,
            other => Self::Rank {
                rank,
                operation,
                source: Box::new(other),
            },
        }
    }

    /// Returns the error with rank context stripped.
    #[must_use]
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Rank { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true for I/O failures, whether raised directly or by storage.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self.root(), Self::Io(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_context_is_displayed() {
        let err = CoreError::overflow("id 300000 > 262143").at(3, "checkpoint");
        assert_eq!(
            err.to_string(),
            "rank 3: checkpoint: overflow: id 300000 > 262143"
        );
    }

    #[test]
    fn root_strips_context() {
        let err = CoreError::recovery_mismatch("var 7").at(0, "recover");
        assert!(matches!(err.root(), CoreError::RecoveryMismatch { .. }));
    }

    #[test]
    fn context_is_attached_once() {
        let err = CoreError::invalid_argument("x").at(1, "protect").at(2, "other");
        assert!(matches!(
            err,
            CoreError::Rank {
                rank: 1,
                operation: "protect",
                ..
            }
        ));
    }

    #[test]
    fn storage_errors_count_as_io() {
        let err: CoreError = dcp_storage::StorageError::ShortWrite {
            written: 0,
            expected: 6,
            attempts: 16,
        }
        .into();
        assert!(err.at(0, "checkpoint").is_io());
    }
}
