use thiserror::Error;
use vtt_cbor::Hash;
use vtt_types::{
    ErrorCode, Path, PathSegment, ResponseError, SessionId, Verb, ValueKind, Version,
};

/// Why a single operation could not be interpreted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OpFailure {
    #[error("path must not be empty")]
    EmptyPath,
    #[error("path depth {depth} exceeds limit {max}")]
    PathTooDeep { depth: usize, max: usize },
    #[error("verb requires a value")]
    MissingValue,
    #[error("unset does not take a value")]
    UnexpectedValue,
    #[error("parent container {0} does not exist")]
    MissingParent(Path),
    #[error("target does not exist")]
    MissingTarget,
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: u64, len: usize },
    #[error("segment '{segment}' cannot address a {kind}")]
    SegmentMismatch { segment: PathSegment, kind: ValueKind },
    #[error("target is a {0}, expected a number")]
    NotNumeric(ValueKind),
    #[error("operand is a {0}, expected a number")]
    OperandNotNumeric(ValueKind),
    #[error("target is a {0}, expected an array")]
    NotArray(ValueKind),
    #[error("numeric overflow")]
    Overflow,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("version conflict: update based on {base}, session is at {current}")]
    VersionConflict {
        base: Version,
        current: Version,
        current_hash: Hash,
    },
    #[error("operation {index} ({verb} {path}) rejected: {reason}")]
    InvalidOperation {
        index: usize,
        verb: Verb,
        path: Path,
        reason: OpFailure,
    },
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("stored state hash mismatch: recorded {recorded}, computed {computed}")]
    HashMismatch { recorded: Hash, computed: Hash },
}

impl EngineError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::VersionConflict { .. } => ErrorCode::VersionConflict,
            EngineError::InvalidOperation { .. } | EngineError::InvalidUpdate(_) => {
                ErrorCode::ValidationError
            }
            EngineError::TransactionFailed(_) | EngineError::HashMismatch { .. } => {
                ErrorCode::TransactionFailed
            }
            EngineError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            EngineError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        }
    }

    /// Render as the error body of a rejected update response.
    pub fn to_response_error(&self) -> ResponseError {
        let (current_version, current_hash) = match self {
            EngineError::VersionConflict {
                current,
                current_hash,
                ..
            } => (Some(*current), Some(*current_hash)),
            _ => (None, None),
        };
        ResponseError {
            code: self.code(),
            message: self.to_string(),
            current_version,
            current_hash,
        }
    }
}
