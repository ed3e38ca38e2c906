//! Error types for Data API operations.

use crate::bulk::BulkWriteError;
use thiserror::Error;

/// All errors that can occur while talking to the Data API.
#[derive(Debug, Error)]
pub enum DataApiError {
    /// Malformed or conflicting caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed dotted field path.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The path as supplied by the caller.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Pull from a cursor that is closed or has no more documents.
    #[error("cursor is closed")]
    CursorClosed,

    /// One or more operations of a bulk write failed.
    #[error("bulk write error: {} failed operations", .0.failures.len())]
    BulkWrite(Box<BulkWriteError>),

    /// Transport or server-side failure reported by the remote API.
    #[error("remote request failed: {message}")]
    RemoteRequestFailed {
        /// HTTP status, when the failure came with one.
        status: Option<u16>,
        /// API error code, when the server supplied one.
        code: Option<String>,
        /// Error message.
        message: String,
    },

    /// More documents match than the caller allowed to count.
    #[error("too many documents to count (upper bound {upper_bound})")]
    TooManyDocumentsToCount {
        /// The bound supplied by the caller.
        upper_bound: u64,
    },

    /// Operation skipped because its batch was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Missing or invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// BSON error.
    #[error("bson error: {0}")]
    Bson(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DataApiError {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DataApiError::InvalidArgument(msg.into())
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        DataApiError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote failure without status or code.
    pub fn remote(msg: impl Into<String>) -> Self {
        DataApiError::RemoteRequestFailed {
            status: None,
            code: None,
            message: msg.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        DataApiError::Config(msg.into())
    }

    /// Check if this error signals the end of a cursor.
    pub fn is_cursor_closed(&self) -> bool {
        matches!(self, DataApiError::CursorClosed)
    }

    /// Check if this is a remote failure.
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, DataApiError::RemoteRequestFailed { .. })
    }

    /// Check if the caller's input was rejected before any request was sent.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            DataApiError::InvalidArgument(_) | DataApiError::InvalidPath { .. }
        )
    }

    /// Get the API error code if available.
    pub fn code(&self) -> Option<&str> {
        match self {
            DataApiError::RemoteRequestFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get the HTTP status if available.
    pub fn status(&self) -> Option<u16> {
        match self {
            DataApiError::RemoteRequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Get the bulk write details, if this is a bulk write error.
    pub fn as_bulk_write(&self) -> Option<&BulkWriteError> {
        match self {
            DataApiError::BulkWrite(err) => Some(err),
            _ => None,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<BulkWriteError> for DataApiError {
    fn from(err: BulkWriteError) -> Self {
        DataApiError::BulkWrite(Box::new(err))
    }
}

impl From<reqwest::Error> for DataApiError {
    fn from(err: reqwest::Error) -> Self {
        DataApiError::RemoteRequestFailed {
            status: err.status().map(|s| s.as_u16()),
            code: None,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DataApiError {
    fn from(err: serde_json::Error) -> Self {
        DataApiError::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for DataApiError {
    fn from(err: bson::ser::Error) -> Self {
        DataApiError::Bson(err.to_string())
    }
}

impl From<bson::de::Error> for DataApiError {
    fn from(err: bson::de::Error) -> Self {
        DataApiError::Deserialization(err.to_string())
    }
}

/// Result type alias for Data API operations.
pub type Result<T> = std::result::Result<T, DataApiError>;

/// Error kind enumeration for pattern matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected caller input.
    InvalidInput,
    /// Cursor end-of-sequence.
    CursorClosed,
    /// Bulk or single write failure.
    Write,
    /// Remote transport or server failure.
    Remote,
    /// Count bound exceeded.
    Count,
    /// Cancelled operation.
    Cancelled,
    /// Client configuration problem.
    Config,
    /// Serialization error.
    Serialization,
    /// Internal error.
    Internal,
}

impl DataApiError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataApiError::InvalidArgument(_) | DataApiError::InvalidPath { .. } => {
                ErrorKind::InvalidInput
            }
            DataApiError::CursorClosed => ErrorKind::CursorClosed,
            DataApiError::BulkWrite(_) => ErrorKind::Write,
            DataApiError::RemoteRequestFailed { .. } => ErrorKind::Remote,
            DataApiError::TooManyDocumentsToCount { .. } => ErrorKind::Count,
            DataApiError::Cancelled => ErrorKind::Cancelled,
            DataApiError::Config(_) => ErrorKind::Config,
            DataApiError::Serialization(_)
            | DataApiError::Deserialization(_)
            | DataApiError::Bson(_) => ErrorKind::Serialization,
            DataApiError::Internal(_) => ErrorKind::Internal,
        }
    }
}
