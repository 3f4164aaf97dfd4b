use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;
use unf::UnfError;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("cannot reach device: {0}")]
    Connection(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("remote file not found: {0}")]
    RemoteFileNotFound(String),

    #[error("appliance returned HTTP {status}: {message}")]
    Appliance { status: u16, message: String },

    #[error("ssh: {0}")]
    Ssh(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Pipeline(#[from] UnfError),

    #[error("worker task failed: {0}")]
    Task(String),

    #[error("client disconnected")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// HTTP status for request/response endpoints.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BackupError::Authentication(_) => StatusCode::UNAUTHORIZED,
            BackupError::RemoteFileNotFound(_) => StatusCode::NOT_FOUND,
            BackupError::Connection(_) | BackupError::Appliance { .. } | BackupError::Ssh(_) => {
                StatusCode::BAD_GATEWAY
            }
            BackupError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BackupError::Pipeline(_) | BackupError::Task(_) | BackupError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackupError::Task(e.to_string())
    }
}
