//! Error types for the repository access layer.
//!
//! Every failure is surfaced to the immediate caller as an [`Error`] value.
//! Errors from libgit2 are converted at the boundary; the native error object
//! is dropped as soon as its code and message have been copied out.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::ObjectType;
use crate::variant::VariantError;

/// The main error type.
#[derive(Debug, Error)]
pub enum Error {
    /// a ref, rev or checksum does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// the object exists but is stored as a different type
    #[error("object {checksum} is a {found}, not a {expected}")]
    TypeMismatch {
        checksum: String,
        expected: ObjectType,
        found: ObjectType,
    },

    /// operation is not valid in the current transaction state
    #[error("cannot {operation} while transaction is {state}")]
    TransactionState {
        operation: &'static str,
        state: &'static str,
    },

    /// failure reported by the underlying object store
    #[error("store error ({code:?}): {message}")]
    Native {
        code: git2::ErrorCode,
        message: String,
    },

    /// structural violation while decoding a variant
    #[error("malformed variant: {0}")]
    MalformedVariant(#[from] VariantError),

    /// a handle was used after its reference was released
    #[error("use of released {type_name} handle")]
    Released { type_name: &'static str },

    /// path does not hold a repository of this layer
    #[error("not a repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// invalid ref, remote or file name
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// checksum string has the wrong format
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// stored object bytes cannot be interpreted
    #[error("corrupted object {checksum}: {reason}")]
    Corrupted { checksum: String, reason: String },

    /// mutable tree cannot be frozen or modified as requested
    #[error("invalid tree: {0}")]
    InvalidTree(String),

    /// repository configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// directory traversal failed during import
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Native {
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

impl Error {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Native { code, .. } => *code == git2::ErrorCode::NotFound,
            _ => false,
        }
    }

    /// check if this error is recoverable by retrying on the same handle
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Native {
                code: git2::ErrorCode::Locked,
                ..
            }
        )
    }

    pub(crate) fn invalid_name(name: impl Into<String>, reason: &'static str) -> Self {
        Error::InvalidName {
            name: name.into(),
            reason,
        }
    }
}

/// result type alias for repository operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = Error::NotFound("refs/heads/missing".to_string());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_retriable());

        let locked = Error::Native {
            code: git2::ErrorCode::Locked,
            message: "transaction lock held".to_string(),
        };
        assert!(locked.is_retriable());
        assert!(!locked.is_not_found());
    }

    #[test]
    fn test_native_error_message_is_copied() {
        let native = git2::Error::new(
            git2::ErrorCode::NotFound,
            git2::ErrorClass::Odb,
            "object not found",
        );
        let err = Error::from(native);
        assert!(err.is_not_found());
        assert!(err.to_string().contains("object not found"));
    }
}
