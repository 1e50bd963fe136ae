//! Error response formatting
//!
//! Every failed request gets the same JSON body: a machine-readable code, a user-facing
//! message, the request id and a timestamp. Internal details stay in the logs.

use crate::error::{AppError, ErrorCode};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// RFC 3339 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }

    pub fn validation_error(request_id: Option<String>, field: &str, message: &str) -> Self {
        Self {
            error: ErrorCode::ValidationError,
            message: format!("Validation failed for field '{}'", field),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: Some(serde_json::json!({
                "field": field,
                "error": message,
            })),
            retryable: Some(false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error_code = ?self.error_code(),
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                context = ?self.context,
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Unparseable bodies get the standard envelope. Syntax errors are 400, well-formed
/// bodies with the wrong shape 422.
pub fn json_rejection_response(rejection: JsonRejection, headers: &HeaderMap) -> Response {
    let status = rejection.status();
    let body = ErrorResponse::validation_error(
        get_request_id_from_headers(headers),
        "body",
        &rejection.body_text(),
    );
    (status, Json(body)).into_response()
}

/// Bad query strings are 400 with the standard envelope
pub fn query_rejection_response(rejection: QueryRejection, headers: &HeaderMap) -> Response {
    let body = ErrorResponse::validation_error(
        get_request_id_from_headers(headers),
        "query",
        &rejection.body_text(),
    );
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Ids that do not parse cannot name a stored record
pub fn path_rejection_response(
    rejection: PathRejection,
    headers: &HeaderMap,
    not_found: AppError,
) -> Response {
    tracing::debug!(reason = %rejection.body_text(), "Unparseable path parameter");
    let mut error = not_found;
    if let Some(request_id) = get_request_id_from_headers(headers) {
        error = error.with_request_id(request_id);
    }
    error.into_response()
}
