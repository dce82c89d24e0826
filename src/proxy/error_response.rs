//! Unified error response handling for the proxy service
//!
//! Every failure on the API surface leaves the sidecar as the same JSON shape:
//! `{"error": {"type": "...", "message": "..."}}`.

use crate::proxy::types::ProxyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error type names carried in the envelope
pub mod error_types {
    pub const MISCONFIGURED: &str = "misconfigured";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const PROXY_ERROR: &str = "proxy_error";
}

/// Body of an API error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(error_types::NOT_FOUND, message)
    }

    /// Convert to an HTTP response with the given status
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    fn to_envelope(&self) -> ErrorEnvelope;

    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for ProxyError {
    fn to_envelope(&self) -> ErrorEnvelope {
        use ProxyError::*;

        match self {
            Misconfigured | InvalidTargetUrl(_) => {
                ErrorEnvelope::new(error_types::MISCONFIGURED, self.to_string())
            }
            UpstreamUnreachable(message) => {
                ErrorEnvelope::new(error_types::UPSTREAM_ERROR, message.clone())
            }
            BodyRead(_) | SerializationError(_) => {
                ErrorEnvelope::new(error_types::PROXY_ERROR, self.to_string())
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            Misconfigured | InvalidTargetUrl(_) | UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            BodyRead(_) | SerializationError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.to_envelope().into_response_with_status(status)
    }
}
