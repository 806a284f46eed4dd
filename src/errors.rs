use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Errors produced by the file-data services.
#[derive(Debug, Error)]
pub enum FileDataError {
    /// Caller supplied an invalid request; never retried.
    #[error("{0}")]
    BadRequest(String),
    #[error("no {object_type} data for file {file_id}")]
    NotFound { file_id: i64, object_type: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    /// Another worker holds the record's lease.
    #[error("file {file_id} is being reconciled, retry later")]
    LeaseHeld { file_id: i64 },
    /// The caller's lease was lost (expired and reclaimed) before the write.
    #[error("lease on file {file_id} is no longer held")]
    LeaseLost { file_id: i64 },
    #[error("signed url is invalid or expired")]
    InvalidSignature,
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type FileDataResult<T> = Result<T, FileDataError>;

impl FileDataError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<FileDataError> for AppError {
    fn from(err: FileDataError) -> Self {
        let status = match &err {
            FileDataError::BadRequest(_) | FileDataError::InvalidObjectKey => {
                StatusCode::BAD_REQUEST
            }
            FileDataError::NotFound { .. } | FileDataError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            FileDataError::LeaseHeld { .. } | FileDataError::LeaseLost { .. } => {
                StatusCode::CONFLICT
            }
            FileDataError::InvalidSignature => StatusCode::FORBIDDEN,
            FileDataError::Sqlx(_) | FileDataError::Io(_) | FileDataError::Json(_) => {
                tracing::error!(error = %err, "request failed");
                return AppError::internal("internal error");
            }
        };
        AppError::new(status, err.to_string())
    }
}
