use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status-code taxonomy for scheduler errors. An RPC layer maps these to
/// wire codes; `Canceled` is also the stored code on forced cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    FailedPrecondition,
    InvalidArgument,
    Canceled,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::NotFound => write!(f, "not_found"),
            ErrorCode::FailedPrecondition => write!(f, "failed_precondition"),
            ErrorCode::InvalidArgument => write!(f, "invalid_argument"),
            ErrorCode::Canceled => write!(f, "canceled"),
            ErrorCode::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("wait canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SchedulerError::NotFound(_) => ErrorCode::NotFound,
            SchedulerError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            SchedulerError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            SchedulerError::Canceled => ErrorCode::Canceled,
            SchedulerError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Internal(err.into())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
