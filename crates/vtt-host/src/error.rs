use thiserror::Error;
use vtt_kernel::EngineError;
use vtt_store::StoreError;
use vtt_types::{ErrorCode, ResponseError, SessionId};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("session '{0}' already exists")]
    SessionExists(SessionId),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("invalid value '{value}' for {var}")]
    Config { var: &'static str, value: String },
    #[error("control error: {0}")]
    Control(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub(crate) fn session_gone(id: &SessionId) -> Self {
        HostError::Engine(EngineError::SessionNotFound(id.clone()))
    }

    /// Wire error code; faults outside the engine surface as `TRANSACTION_FAILED`.
    pub fn code(&self) -> ErrorCode {
        match self {
            HostError::Engine(err) => err.code(),
            _ => ErrorCode::TransactionFailed,
        }
    }

    pub fn to_response_error(&self) -> ResponseError {
        match self {
            HostError::Engine(err) => err.to_response_error(),
            other => ResponseError {
                code: other.code(),
                message: other.to_string(),
                current_version: None,
                current_hash: None,
            },
        }
    }
}
