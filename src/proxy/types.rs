//! Type definitions for the proxy module

use chrono::Utc;
use derive_more::Display;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ========== Size Types ==========

/// Default cap on the captured copy of a response body (2 MiB)
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 2 * 1024 * 1024;

/// Maximum number of response body bytes kept in the capture log
#[nutype(
    validate(predicate = |size: &usize| *size > 0),
    default = 2097152,
    derive(
        Clone,
        Copy,
        Debug,
        Display,
        Default,
        PartialEq,
        Eq,
        Deserialize,
        Serialize,
        TryFrom,
        AsRef
    )
)]
pub struct MaxCaptureBytes(usize);

// ========== Identifier Types ==========

/// Per-request correlation key shared by a request event and its response event
#[nutype(derive(Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, AsRef))]
pub struct TraceId(String);

impl TraceId {
    /// Create a trace id of the form `ctx_YYYYMMDD_HHMMSS_xxxxxxxx`
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self::new(format!("ctx_{stamp}_{}", &suffix[..8]))
    }
}

// ========== Upstream Types ==========

/// Base URL of the real upstream API
#[nutype(
    sanitize(trim),
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct UpstreamBaseUrl(String);

/// Credential the sidecar presents to the upstream in place of the caller's
///
/// Must be usable verbatim in an `authorization` header value.
#[nutype(
    sanitize(trim),
    validate(not_empty, predicate = |s: &str| ::http::HeaderValue::from_str(s).is_ok()),
    derive(Clone, PartialEq, Eq, Hash, TryFrom, AsRef)
)]
pub struct ApiKey(String);

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Shared secret guarding the admin endpoints
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(Clone, PartialEq, Eq, TryFrom, AsRef)
)]
pub struct AdminToken(String);

impl fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminToken(***)")
    }
}

// ========== Mode ==========

/// Operating mode of the sidecar
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Forward every request to the configured upstream
    #[default]
    #[display("passthrough")]
    Passthrough,
    /// Synthesize responses locally
    #[display("mock")]
    Mock,
}

/// Returned when a string names no known mode
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" => Ok(Self::Passthrough),
            "mock" => Ok(Self::Mock),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Which component produced a response event
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[display("passthrough")]
    Passthrough,
    #[display("mock")]
    Mock,
}

// ========== Constants ==========

/// Service name reported by health checks and the startup line
pub const SERVICE_NAME: &str = "modelbox";

/// Model name used by mock responses when the request names none
pub const DEFAULT_MOCK_MODEL: &str = "mock-model";

/// Marker substituted for sensitive header values in the capture log
pub const REDACTED: &str = "[REDACTED]";

/// Prefix of the debug text returned by mock completions
pub const DEBUG_TEXT_PREFIX: &str = "DEBUG_CONTEXT_SUMMARY";

/// Errors raised while handling a proxied request
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("upstream base URL is required in passthrough mode")]
    Misconfigured,

    #[error("Invalid target URL: {0}")]
    InvalidTargetUrl(String),

    #[error("{0}")]
    UpstreamUnreachable(String),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
