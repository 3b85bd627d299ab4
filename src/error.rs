use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::{ContentError, ErrorKind};

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::InvalidInput => AppError::BadRequest(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::DeadlineExceeded => AppError::Timeout(message),
            ErrorKind::Cancelled => AppError::Unavailable(message),
            ErrorKind::Backend => match err {
                ContentError::Storage { .. } => AppError::Storage(message),
                _ => AppError::Internal(message),
            },
        }
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, 409, msg.clone()),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, 413, msg.clone()),
            AppError::Timeout(msg) => {
                tracing::warn!("Request timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, 504, msg.clone())
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Request cancelled: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, 503, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Internal error".to_string())
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Storage error".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "IO error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_content_error_mapping() {
        let status = |err: ContentError| AppError::from(err).into_response().status();

        assert_eq!(
            status(ContentError::InvalidInput("size".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(ContentError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(ContentError::Conflict("dup".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(ContentError::DeadlineExceeded("store")),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(ContentError::Cancelled("store")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(ContentError::Storage {
                op: "store",
                key: "k".into(),
                source: StorageError::Backend("503".into()),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        // Record present, bytes gone
        assert_eq!(
            status(ContentError::Storage {
                op: "fetch",
                key: "k".into(),
                source: StorageError::NotFound("k".into()),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
