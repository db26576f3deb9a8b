use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors raised by the backup subsystem.
#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("Backup tool '{0}' is not available")]
    ToolUnavailable(String),

    #[error("Backup file not found: {0}")]
    NotFound(String),

    #[error("Invalid backup file name: {0}")]
    InvalidName(String),

    #[error("Database connection string is not configured")]
    MissingConnection,

    #[error("Unsupported database connection string: {0}")]
    InvalidConnection(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ProcessFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("{tool} finished but produced no output file")]
    MissingOutput { tool: String },

    #[error("No collections found in database")]
    NoCollections,

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("A backup or restore is already in progress")]
    Busy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl BackupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::NotFound(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::NotFound(_) => AppError::NotFound(err.to_string()),
            BackupError::InvalidName(_)
            | BackupError::MissingConnection
            | BackupError::InvalidConnection(_) => AppError::BadRequest(err.to_string()),
            BackupError::Busy => AppError::Conflict(err.to_string()),
            other => AppError::Failed(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Failed(m) => {
                tracing::error!("Request failed: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "success": false, "error": msg }))).into_response()
    }
}
