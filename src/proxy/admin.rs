//! Admin surface: read and patch the runtime configuration
//!
//! Every `/admin/*` request is authorized first. When no admin token is
//! configured the surface is open.

use crate::proxy::headers::{paths, AUTHORIZATION, X_MODELBOX_TOKEN, X_SIDECAR_TOKEN};
use crate::proxy::state::{ConfigCell, PublicState, StatePatch};
use crate::proxy::types::AdminToken;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, Method, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Failures on the admin surface; bodies are a flat `{"error": "..."}`
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdminError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid_json")]
    InvalidJson,
    #[error("not_found")]
    NotFound,
}

impl AdminError {
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidJson => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Check the caller's credential against the configured admin token
///
/// The candidate is the `authorization` value with any `Bearer` prefix
/// removed (matched case-insensitively); when that is empty the
/// `x-modelbox-token` header, then `x-sidecar-token`, are used instead.
pub fn authorize(headers: &HeaderMap, token: Option<&AdminToken>) -> Result<(), AdminError> {
    let Some(expected) = token else {
        return Ok(());
    };

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(strip_bearer)
        .unwrap_or_default();
    let candidate = if bearer.is_empty() {
        [X_MODELBOX_TOKEN, X_SIDECAR_TOKEN]
            .iter()
            .find_map(|name| headers.get(*name).and_then(|value| value.to_str().ok()))
            .unwrap_or_default()
    } else {
        bearer
    };

    if candidate == expected.as_ref() {
        Ok(())
    } else {
        Err(AdminError::Unauthorized)
    }
}

fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim_start();
    let scheme_len = "bearer".len();
    match trimmed.get(..scheme_len) {
        Some(scheme)
            if scheme.eq_ignore_ascii_case("bearer")
                && trimmed[scheme_len..].starts_with(char::is_whitespace) =>
        {
            trimmed[scheme_len..].trim()
        }
        _ => value.trim(),
    }
}

/// Handle one authorized admin request
pub fn handle(
    config: &ConfigCell,
    base_dir: &Path,
    method: &Method,
    path: &str,
    body: &[u8],
) -> Result<PublicState, AdminError> {
    match (method, path) {
        (&Method::GET, paths::ADMIN_STATE) => Ok(config.snapshot().public_view()),
        (&Method::POST, paths::ADMIN_STATE) => {
            let parsed: Value = serde_json::from_slice(body).map_err(|e| {
                warn!(error = %e, "rejecting admin update with malformed body");
                AdminError::InvalidJson
            })?;
            let Value::Object(fields) = parsed else {
                return Err(AdminError::InvalidJson);
            };

            let patch = StatePatch::from_json(&fields, base_dir);
            let updated = config.update(|current| patch.apply(current));
            info!(
                mode = %updated.mode,
                capture = updated.capture_enabled,
                log_file = %updated.log_file_path.display(),
                "runtime configuration changed via admin"
            );
            Ok(updated.public_view())
        }
        _ => Err(AdminError::NotFound),
    }
}
