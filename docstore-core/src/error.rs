//! Error types and result types for document store operations.
//!
//! Errors are mapped from whatever the driver reports onto a small closed set of
//! categories. The driver's own message is always kept so nothing is lost in
//! translation. Use [`DocumentStoreResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when talking to a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization error when converting a value into a document.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A document or result could not be decoded into the requested shape.
    #[error("Decode error: {0}")]
    Decode(String),
    /// Error during client construction or configuration.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The driver could not reach the database.
    #[error("Connectivity error: {0}")]
    Connectivity(String),
    /// The database rejected a document, filter, update or pipeline.
    #[error("Validation error{}: {message}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Validation {
        /// Driver or server error code, when one was reported.
        code: Option<i32>,
        /// The driver's message.
        message: String,
    },
    /// A single-document read or a targeted admin operation matched nothing.
    #[error("Not found in {0}")]
    NotFound(String),
    /// A session or transaction primitive failed.
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// The callback of a transaction failed and aborting the transaction failed as well.
    ///
    /// `cause` is the callback's error and is reported as the source; `abort` is the
    /// failure raised while rolling back.
    #[error("Transaction aborted after error ({cause}); abort also failed: {abort}")]
    TransactionAbortFailed {
        /// The error returned by the transaction callback.
        #[source]
        cause: Box<DocumentStoreError>,
        /// The error raised by the abort itself.
        abort: Box<DocumentStoreError>,
    },
    /// The operation did not finish before the caller's deadline.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
    /// Any other error reported by the driver.
    #[error("Driver error{}: {message}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Driver {
        /// Driver or server error code, when one was reported.
        code: Option<i32>,
        /// The driver's message.
        message: String,
    },
}

impl DocumentStoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        DocumentStoreError::Validation { code: None, message: message.into() }
    }

    pub fn driver(message: impl Into<String>) -> Self {
        DocumentStoreError::Driver { code: None, message: message.into() }
    }

    /// Returns the driver or server error code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            DocumentStoreError::Validation { code, .. } | DocumentStoreError::Driver { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentStoreError::NotFound(_))
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

/// The failure of a single item inside a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Driver or server error code, when one was reported.
    pub code: Option<i32>,
    /// The driver's message for this item.
    pub message: String,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl From<&DocumentStoreError> for ItemFailure {
    fn from(err: &DocumentStoreError) -> Self {
        ItemFailure { code: err.code(), message: err.to_string() }
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn abort_failure_keeps_callback_error_as_source() {
        let err = DocumentStoreError::TransactionAbortFailed {
            cause: Box::new(DocumentStoreError::validation("bad update")),
            abort: Box::new(DocumentStoreError::Connectivity("socket closed".into())),
        };

        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Validation error: bad update");
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn codes_are_rendered_when_present() {
        let err = DocumentStoreError::Validation { code: Some(11000), message: "duplicate key".into() };

        assert_eq!(err.to_string(), "Validation error (11000): duplicate key");
        assert_eq!(err.code(), Some(11000));
        assert_eq!(ItemFailure::from(&err).code, Some(11000));
    }
}
