// Route modules for Huddle Server
pub mod files; // File metadata and downloads
pub mod history; // Message history, search and room listing
pub mod websocket; // Real-time event channel

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// JSON error body shared by the HTTP routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors returned by the HTTP routes.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed query or path parameter
    BadRequest(String),
    /// Requested resource does not exist
    NotFound(String),
    /// Hub or storage failure
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("bad_request", &msg),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new("not_found", &msg)),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("internal_error", &msg),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<huddle_hub::HubError> for ApiError {
    fn from(err: huddle_hub::HubError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
