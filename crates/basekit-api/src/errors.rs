//! Error types for the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use basekit_core::HealthError;
use tracing::error;

use crate::responses::ErrorResponse;

/// Handler errors with HTTP status code mapping.
///
/// Rendered as a JSON body of the form `{"status":"error","error":"<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A dependency reported by the healthcheck is unavailable
    #[error("{0}")]
    Unhealthy(#[from] HealthError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unhealthy(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        error!(status = %status, error = %message, "Request failed");

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

/// Errors raised while binding or running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}
