use std::fmt;

use serde::{Deserialize, Serialize};

/// Error taxonomy reported in update responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Stale base version; reconcile and retry.
    VersionConflict,
    /// Malformed or type-mismatched operation; nothing applied.
    ValidationError,
    /// Internal fault mid-apply; fully rolled back, retryable.
    TransactionFailed,
    /// Unknown or ended session.
    SessionNotFound,
    /// Not the writer, or the writer is disconnected.
    PermissionDenied,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
