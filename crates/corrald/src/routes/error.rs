//! Conversion of domain errors into HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use corral_common::CorralError;

/// Handler error; rendered as its status code and plain message
#[derive(Debug)]
pub struct ApiError(pub CorralError);

impl From<CorralError> for ApiError {
    fn from(error: CorralError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }

        let body = match self.0 {
            // callers match on the exact text of these
            CorralError::Authorization(_) => "Permission denied".to_string(),
            CorralError::Conflict(message) | CorralError::InvalidInput(message) => message,
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
