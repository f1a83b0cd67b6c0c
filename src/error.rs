use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Why a binary transfer ended without a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload canceled by the user")]
    Canceled,
    #[error("upload failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    #[error("{0}")]
    Validation(String),
    #[error("You must be signed in to do this")]
    AuthRequired,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Destructive actions must be confirmed with confirm=true")]
    ConfirmationRequired,
    #[error("Write rejected by the document store: {0}")]
    RemoteWrite(String),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StudioError {
    /// Only store-side write rejections are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StudioError::RemoteWrite(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StudioError::NotFound(_))
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(value: serde_json::Error) -> Self {
        StudioError::Validation(format!("malformed record: {value}"))
    }
}

impl From<reqwest::Error> for StudioError {
    fn from(value: reqwest::Error) -> Self {
        StudioError::Internal(format!("HTTP error: {value}"))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PreconditionRequired(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::PreconditionRequired(msg) => {
                (StatusCode::PRECONDITION_REQUIRED, msg).into_response()
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StudioError> for ApiError {
    fn from(value: StudioError) -> Self {
        match value {
            StudioError::Validation(_) => ApiError::BadRequest(value.to_string()),
            StudioError::AuthRequired | StudioError::Unauthorized(_) => {
                ApiError::Unauthorized(value.to_string())
            }
            StudioError::Forbidden(_) => ApiError::Forbidden(value.to_string()),
            StudioError::Conflict(_) => ApiError::Conflict(value.to_string()),
            StudioError::ConfirmationRequired => {
                ApiError::PreconditionRequired(value.to_string())
            }
            StudioError::NotFound(_) => ApiError::NotFound(value.to_string()),
            StudioError::RemoteWrite(_) | StudioError::Upload(_) => {
                error!("Remote platform error: {value}");
                ApiError::BadGateway(value.to_string())
            }
            StudioError::Internal(msg) => {
                error!("Internal error: {msg}");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid multipart body: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StudioError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (StudioError::AuthRequired, StatusCode::UNAUTHORIZED),
            (StudioError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (StudioError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                StudioError::ConfirmationRequired,
                StatusCode::PRECONDITION_REQUIRED,
            ),
            (StudioError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                StudioError::RemoteWrite("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                StudioError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_only_remote_writes_are_retryable() {
        assert!(StudioError::RemoteWrite("busy".into()).is_retryable());
        assert!(!StudioError::NotFound("booking".into()).is_retryable());
        assert!(!StudioError::Upload(UploadError::Canceled).is_retryable());
    }
}
