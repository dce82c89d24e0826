//! HTTP header constants and utilities for the proxy service
//!
//! This module centralizes the header names the sidecar treats specially and
//! the three header/body utilities every capture point relies on:
//! hop-by-hop filtering, capture-side redaction and content fingerprints.

use crate::proxy::types::REDACTED;
use ::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

/// Alternate header carrying the admin token
pub const X_MODELBOX_TOKEN: &str = "x-modelbox-token";

/// Legacy alternate header carrying the admin token
pub const X_SIDECAR_TOKEN: &str = "x-sidecar-token";

/// Header name for API key authentication
pub const X_API_KEY: &str = "x-api-key";

/// Authorization header prefix for bearer tokens
pub const BEARER_PREFIX: &str = "Bearer ";

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};

/// Headers meaningful only to a single connection leg
pub const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Headers whose values never reach the capture log when redaction is on
pub const SENSITIVE: [&str; 3] = ["authorization", "x-api-key", "proxy-authorization"];

/// Well-known paths
pub mod paths {
    /// Health check endpoint path
    pub const HEALTH: &str = "/healthz";

    /// Prefix of the admin endpoints
    pub const ADMIN_PREFIX: &str = "/admin/";

    /// Admin state endpoint path
    pub const ADMIN_STATE: &str = "/admin/state";

    /// Prefix of the proxied API surface
    pub const API_PREFIX: &str = "/v1/";

    /// Model listing route
    pub const MODELS: &str = "/v1/models";

    /// Chat completion route
    pub const CHAT_COMPLETIONS: &str = "/v1/chat/completions";

    /// Structured response route
    pub const RESPONSES: &str = "/v1/responses";
}

/// Common content types
pub mod content_types {
    pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";
    pub const TEXT_EVENT_STREAM: &str = "text/event-stream";
    pub const NO_CACHE: &str = "no-cache, no-transform";
}

/// Whether a header is stripped before relaying in either direction
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    // HeaderName is always lowercase
    let name = name.as_str();
    name == CONTENT_LENGTH.as_str() || HOP_BY_HOP.contains(&name)
}

/// Copy a header set without hop-by-hop headers or content-length
pub fn filter_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Headers forwarded upstream: hop-by-hop filtered, with the sidecar's own
/// credential taking precedence over whatever the caller sent
pub fn forward_headers(headers: &HeaderMap, api_key: Option<&str>) -> HeaderMap {
    let mut forwarded = filter_hop_by_hop(headers);
    if let Some(key) = api_key {
        // the caller's credential never goes upstream once a key is configured
        forwarded.remove(AUTHORIZATION);
        match HeaderValue::from_str(&format!("{BEARER_PREFIX}{key}")) {
            Ok(value) => {
                forwarded.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "configured upstream key is not a valid header value"),
        }
    }
    forwarded
}

/// Flatten headers into the map written to the capture log
///
/// Multiple values for one name are joined with `,`. Non-UTF-8 values are
/// replaced lossily. With `redact` set, sensitive values become [`REDACTED`].
pub fn redact_for_capture(headers: &HeaderMap, redact: bool) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for name in headers.keys() {
        let key = name.as_str().to_string();
        let value = if redact && SENSITIVE.contains(&key.as_str()) {
            REDACTED.to_string()
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",")
        };
        out.insert(key, value);
    }
    out
}

/// SHA-256 hex digest of a byte sequence
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
