//! API Error Handling
//!
//! Structured error responses with HTTP status codes and request tracking.

use crate::errors::PayoutError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// NOT_FOUND, BAD_REQUEST, INVALID_RESULT, CONFLICT, ...
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    InvalidResult(String),
    Conflict(String),
    InternalError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    fn new(request_id: String, kind: ApiErrorKind) -> Self {
        Self {
            kind,
            request_id,
            details: None,
        }
    }

    pub fn not_found(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::NotFound(message))
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::BadRequest(message))
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::InternalError(message))
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Map a core error onto its HTTP class
    pub fn from_payout(request_id: String, err: PayoutError) -> Self {
        let message = err.to_string();
        let details = match &err {
            PayoutError::InsufficientFunds { available, requested } => Some(serde_json::json!({
                "available_sol": available,
                "requested_sol": requested,
            })),
            _ => None,
        };
        let kind = match err {
            PayoutError::NotFound { .. } => ApiErrorKind::NotFound(message),
            PayoutError::InvalidInput(_) | PayoutError::InsufficientFunds { .. } => {
                ApiErrorKind::BadRequest(message)
            }
            PayoutError::InvalidResult(_) => ApiErrorKind::InvalidResult(message),
            PayoutError::Contention { .. } => ApiErrorKind::Conflict(message),
            PayoutError::StoreUnavailable(_) | PayoutError::PricingUnavailable(_) => {
                ApiErrorKind::ServiceUnavailable(message)
            }
            PayoutError::Configuration(_) | PayoutError::Storage(_) => {
                tracing::error!(request_id = %request_id, error = %message, "Internal error");
                ApiErrorKind::InternalError(message)
            }
        };
        Self {
            kind,
            request_id,
            details,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::InvalidResult(msg) => write!(f, "[{}] Invalid Result: {}", self.request_id, msg),
            ApiErrorKind::Conflict(msg) => write!(f, "[{}] Conflict: {}", self.request_id, msg),
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
            ApiErrorKind::ServiceUnavailable(msg) => write!(f, "[{}] Service Unavailable: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiErrorKind::InvalidResult(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_RESULT", msg.clone())
            }
            ApiErrorKind::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiErrorKind::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
            ApiErrorKind::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: self.details.clone(),
            },
        });

        (status, body).into_response()
    }
}
