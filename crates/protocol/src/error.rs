//! Error taxonomy shared by every gateway operation.
//!
//! Every failure an operation can report maps onto one of a closed set of
//! [`ErrorKind`]s. Expected failures are raised deliberately at validation
//! points; anything else (OS errors, archive I/O) is folded into
//! [`GatewayError::Internal`] carrying the original message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    OutsideRoot,
    NotDir,
    NotFile,
    NotExist,
    AlreadyExists,
    NotFound,
    BlockedExt,
    InvalidName,
    DecodeError,
    BadZipFile,
    InvalidAlgorithm,
    CannotDeleteRoot,
    NotFileOrDir,
    NotInitialized,
    InternalError,
}

impl ErrorKind {
    /// The wire identifier, e.g. `OUTSIDE_ROOT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutsideRoot => "OUTSIDE_ROOT",
            Self::NotDir => "NOT_DIR",
            Self::NotFile => "NOT_FILE",
            Self::NotExist => "NOT_EXIST",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotFound => "NOT_FOUND",
            Self::BlockedExt => "BLOCKED_EXT",
            Self::InvalidName => "INVALID_NAME",
            Self::DecodeError => "DECODE_ERROR",
            Self::BadZipFile => "BAD_ZIP_FILE",
            Self::InvalidAlgorithm => "INVALID_ALGORITHM",
            Self::CannotDeleteRoot => "CANNOT_DELETE_ROOT",
            Self::NotFileOrDir => "NOT_FILE_OR_DIR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error type covering all possible failure modes.
///
/// Each variant carries a short human-readable detail, usually the
/// client-supplied path the failure refers to.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The path resolves outside the session root.
    #[error("path is outside the session root: {0}")]
    OutsideRoot(String),

    /// The path is missing or not a directory.
    #[error("not a directory: {0}")]
    NotDir(String),

    /// The path is missing or not a regular file.
    #[error("not a file: {0}")]
    NotFile(String),

    /// The path does not exist.
    #[error("path does not exist: {0}")]
    NotExist(String),

    /// The destination already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The searched text does not occur.
    #[error("text not found: {0}")]
    NotFound(String),

    /// The file extension is on the blocked list.
    #[error("extension is blocked for security reasons: {0}")]
    BlockedExt(String),

    /// The supplied name is not a plain file name.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The file is not valid UTF-8 text.
    #[error("file is not valid UTF-8 text: {0}")]
    DecodeError(String),

    /// The archive is structurally invalid.
    #[error("not a valid zip archive: {0}")]
    BadZipFile(String),

    /// The hash algorithm is not supported.
    #[error("unsupported hash algorithm: {0}")]
    InvalidAlgorithm(String),

    /// The operation would delete or move the session root.
    #[error("refusing to delete the session root")]
    CannotDeleteRoot,

    /// The source is neither a regular file nor a directory.
    #[error("source is neither a file nor a directory: {0}")]
    NotFileOrDir(String),

    /// No session root has been configured yet.
    #[error("session root is not initialized")]
    NotInitialized,

    /// Any unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The closed-set kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutsideRoot(_) => ErrorKind::OutsideRoot,
            Self::NotDir(_) => ErrorKind::NotDir,
            Self::NotFile(_) => ErrorKind::NotFile,
            Self::NotExist(_) => ErrorKind::NotExist,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BlockedExt(_) => ErrorKind::BlockedExt,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::DecodeError(_) => ErrorKind::DecodeError,
            Self::BadZipFile(_) => ErrorKind::BadZipFile,
            Self::InvalidAlgorithm(_) => ErrorKind::InvalidAlgorithm,
            Self::CannotDeleteRoot => ErrorKind::CannotDeleteRoot,
            Self::NotFileOrDir(_) => ErrorKind::NotFileOrDir,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Convert to the wire representation.
    pub fn to_error_message(&self) -> ErrorMessage {
        ErrorMessage {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error as sent back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl From<GatewayError> for ErrorMessage {
    fn from(err: GatewayError) -> Self {
        err.to_error_message()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
