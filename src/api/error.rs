//! Mapping of [`Error`] onto HTTP responses.
//!
//! Body shape: `{"success": false, "error": "...", "retryable": bool}`.

use crate::errors::Error;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    retryable: bool,
}

impl Error {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } | Self::UserNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamProvider { .. }
            | Self::Persistence(_)
            | Self::Configuration { .. }
            | Self::Io(_)
            | Self::EnvVar(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::Persistence(_) | Self::Io(_) | Self::EnvVar(_) => {
                error!(error = %self, "Request failed");
                "Internal error, please retry".to_string()
            }
            Self::Configuration { .. } | Self::UpstreamProvider { .. } => {
                error!(error = %self, "Request failed");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorBody {
            success: false,
            error: message,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
