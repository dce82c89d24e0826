//! Process-wide runtime configuration
//!
//! All components read the configuration through [`ConfigCell::snapshot`],
//! which hands out an immutable `Arc<RuntimeConfig>`. Updates build a complete
//! new value and swap it in under a write lock, so no reader ever observes a
//! half-applied change.

use crate::proxy::types::{AdminToken, ApiKey, MaxCaptureBytes, Mode, UpstreamBaseUrl};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default location of the capture log, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "./logs/modelbox.jsonl";

/// One complete configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub mode: Mode,
    pub capture_enabled: bool,
    pub upstream_base_url: Option<UpstreamBaseUrl>,
    pub upstream_api_key: Option<ApiKey>,
    pub admin_token: Option<AdminToken>,
    pub redact_auth_headers: bool,
    pub log_file_path: PathBuf,
    pub max_capture_bytes: MaxCaptureBytes,
}

impl RuntimeConfig {
    /// Defaults for everything except where the capture log goes
    pub fn new(log_file_path: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Passthrough,
            capture_enabled: true,
            upstream_base_url: None,
            upstream_api_key: None,
            admin_token: None,
            redact_auth_headers: true,
            log_file_path: log_file_path.into(),
            max_capture_bytes: MaxCaptureBytes::default(),
        }
    }

    /// Configuration view safe to return to admin callers
    pub fn public_view(&self) -> PublicState {
        PublicState {
            mode: self.mode,
            capture: self.capture_enabled,
            upstream_base_url: self
                .upstream_base_url
                .as_ref()
                .map(|url| url.as_ref().to_string()),
            has_upstream_api_key: self.upstream_api_key.is_some(),
            log_file: self.log_file_path.display().to_string(),
            max_capture_bytes: self.max_capture_bytes.into_inner(),
        }
    }
}

/// Admin view of the configuration; secrets appear only as presence flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicState {
    pub mode: Mode,
    pub capture: bool,
    pub upstream_base_url: Option<String>,
    pub has_upstream_api_key: bool,
    pub log_file: String,
    pub max_capture_bytes: usize,
}

/// Partial update accepted by the admin endpoint
///
/// `None` leaves a field alone. For the two optional upstream fields,
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub mode: Option<Mode>,
    pub capture: Option<bool>,
    pub upstream_base_url: Option<Option<UpstreamBaseUrl>>,
    pub upstream_api_key: Option<Option<ApiKey>>,
    pub max_capture_bytes: Option<MaxCaptureBytes>,
    pub log_file: Option<PathBuf>,
}

impl StatePatch {
    /// Extract the recognised, valid fields of an admin request body
    ///
    /// Unknown keys and values of the wrong type or out of range are ignored.
    /// A relative `logFile` is resolved against `base_dir`.
    pub fn from_json(body: &Map<String, Value>, base_dir: &Path) -> Self {
        let mut patch = Self::default();

        if let Some(value) = body.get("mode") {
            match value.as_str().map(str::parse::<Mode>) {
                Some(Ok(mode)) => patch.mode = Some(mode),
                _ => warn!(value = %value, "ignoring invalid mode in state update"),
            }
        }
        if let Some(capture) = body.get("capture").and_then(Value::as_bool) {
            patch.capture = Some(capture);
        }
        if let Some(raw) = body.get("upstreamBaseUrl").and_then(Value::as_str) {
            if raw.trim().is_empty() {
                patch.upstream_base_url = Some(None);
            } else {
                match UpstreamBaseUrl::try_new(raw) {
                    Ok(url) => patch.upstream_base_url = Some(Some(url)),
                    Err(e) => warn!(error = %e, "ignoring invalid upstream base URL"),
                }
            }
        }
        if let Some(raw) = body.get("upstreamApiKey").and_then(Value::as_str) {
            if raw.trim().is_empty() {
                patch.upstream_api_key = Some(None);
            } else {
                match ApiKey::try_new(raw) {
                    Ok(key) => patch.upstream_api_key = Some(Some(key)),
                    Err(e) => warn!(error = %e, "ignoring unusable upstream API key"),
                }
            }
        }
        if let Some(n) = body.get("maxCaptureBytes").and_then(Value::as_f64) {
            if n.is_finite() && n >= 1.0 {
                // saturating float-to-int conversion
                patch.max_capture_bytes = MaxCaptureBytes::try_new(n.floor() as usize).ok();
            }
        }
        if let Some(raw) = body.get("logFile").and_then(Value::as_str) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                patch.log_file = Some(resolve_path(trimmed, base_dir));
            }
        }

        patch
    }

    /// Apply the patch to a configuration value
    pub fn apply(self, config: &mut RuntimeConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(capture) = self.capture {
            config.capture_enabled = capture;
        }
        if let Some(url) = self.upstream_base_url {
            config.upstream_base_url = url;
        }
        if let Some(key) = self.upstream_api_key {
            config.upstream_api_key = key;
        }
        if let Some(max) = self.max_capture_bytes {
            config.max_capture_bytes = max;
        }
        if let Some(path) = self.log_file {
            config.log_file_path = path;
        }
    }
}

/// Resolve a possibly relative path against a base directory
pub fn resolve_path(raw: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        let relative: PathBuf = path
            .components()
            .filter(|component| !matches!(component, Component::CurDir))
            .collect();
        base_dir.join(relative)
    }
}

/// Synchronized, versioned holder of the current configuration
#[derive(Debug)]
pub struct ConfigCell {
    inner: RwLock<Versioned>,
}

#[derive(Debug)]
struct Versioned {
    version: u64,
    config: Arc<RuntimeConfig>,
}

impl ConfigCell {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: RwLock::new(Versioned {
                version: 0,
                config: Arc::new(config),
            }),
        }
    }

    /// Current configuration; stays valid however the cell changes later
    pub fn snapshot(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.inner.read().config)
    }

    /// Number of updates applied since start
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Apply an update atomically and return the new configuration
    pub fn update<F>(&self, change: F) -> Arc<RuntimeConfig>
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let mut guard = self.inner.write();
        let mut next = RuntimeConfig::clone(&guard.config);
        change(&mut next);
        guard.version += 1;
        guard.config = Arc::new(next);
        debug!(version = guard.version, "runtime configuration updated");
        Arc::clone(&guard.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test body must be an object"),
        }
    }

    fn base() -> RuntimeConfig {
        RuntimeConfig::new("/tmp/modelbox-test.jsonl")
    }

    #[test]
    fn bogus_mode_leaves_mode_unchanged() {
        let cell = ConfigCell::new(RuntimeConfig {
            mode: Mode::Mock,
            ..base()
        });
        let patch = StatePatch::from_json(&body(json!({"mode": "bogus"})), Path::new("/"));
        cell.update(|config| patch.apply(config));

        assert_eq!(cell.snapshot().mode, Mode::Mock);
    }

    #[test]
    fn valid_fields_are_applied() {
        let cell = ConfigCell::new(base());
        let patch = StatePatch::from_json(
            &body(json!({
                "mode": "mock",
                "capture": false,
                "upstreamBaseUrl": " https://api.example.com/v1 ",
                "upstreamApiKey": "sk-1",
                "maxCaptureBytes": 1024.7,
                "logFile": "captures/out.jsonl",
            })),
            Path::new("/srv"),
        );
        let config = cell.update(|config| patch.apply(config));

        assert_eq!(config.mode, Mode::Mock);
        assert!(!config.capture_enabled);
        assert_eq!(
            config.upstream_base_url.as_ref().unwrap().as_ref(),
            "https://api.example.com/v1"
        );
        assert_eq!(config.upstream_api_key.as_ref().unwrap().as_ref(), "sk-1");
        assert_eq!(config.max_capture_bytes.into_inner(), 1024);
        assert_eq!(config.log_file_path, PathBuf::from("/srv/captures/out.jsonl"));
    }

    #[test]
    fn invalid_values_are_ignored() {
        let cell = ConfigCell::new(base());
        let patch = StatePatch::from_json(
            &body(json!({
                "capture": "no",
                "upstreamBaseUrl": "ftp://nope",
                "maxCaptureBytes": 0,
                "logFile": "   ",
                "adminToken": "steal",
                "unknown": true,
            })),
            Path::new("/"),
        );
        let config = cell.update(|config| patch.apply(config));

        assert_eq!(*config, base());
    }

    #[test]
    fn empty_strings_clear_upstream_settings() {
        let cell = ConfigCell::new(RuntimeConfig {
            upstream_base_url: Some(UpstreamBaseUrl::try_new("https://a.example").unwrap()),
            upstream_api_key: Some(ApiKey::try_new("k").unwrap()),
            ..base()
        });
        let patch = StatePatch::from_json(
            &body(json!({"upstreamBaseUrl": "", "upstreamApiKey": "  "})),
            Path::new("/"),
        );
        let config = cell.update(|config| patch.apply(config));

        assert!(config.upstream_base_url.is_none());
        assert!(config.upstream_api_key.is_none());
    }

    #[test]
    fn unusable_api_key_keeps_the_current_one() {
        let cell = ConfigCell::new(RuntimeConfig {
            upstream_api_key: Some(ApiKey::try_new("sk-good").unwrap()),
            ..base()
        });
        let patch = StatePatch::from_json(&body(json!({"upstreamApiKey": "a\nb"})), Path::new("/"));
        let config = cell.update(|config| patch.apply(config));

        assert_eq!(config.upstream_api_key.as_ref().unwrap().as_ref(), "sk-good");
    }

    #[test]
    fn snapshots_are_isolated_from_later_updates() {
        let cell = ConfigCell::new(base());
        let before = cell.snapshot();

        cell.update(|config| {
            config.mode = Mode::Mock;
            config.capture_enabled = false;
        });

        assert_eq!(before.mode, Mode::Passthrough);
        assert!(before.capture_enabled);
        assert_eq!(cell.snapshot().mode, Mode::Mock);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn public_view_hides_secrets() {
        let config = RuntimeConfig {
            upstream_api_key: Some(ApiKey::try_new("sk-secret").unwrap()),
            admin_token: Some(AdminToken::try_new("admin-secret").unwrap()),
            ..base()
        };
        let json = serde_json::to_string(&config.public_view()).unwrap();

        assert!(json.contains("\"hasUpstreamApiKey\":true"));
        assert!(json.contains("\"upstreamBaseUrl\":null"));
        assert!(!json.contains("sk-secret"));
        assert!(!json.contains("admin-secret"));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        assert_eq!(
            resolve_path("./logs/a.jsonl", Path::new("/srv")).display().to_string(),
            "/srv/logs/a.jsonl"
        );
        assert_eq!(resolve_path("/abs/b.jsonl", Path::new("/srv")), PathBuf::from("/abs/b.jsonl"));
    }

    #[test]
    fn concurrent_readers_see_complete_values() {
        let cell = Arc::new(ConfigCell::new(base()));
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 0..500 {
                    cell.update(|config| {
                        let mock = i % 2 == 0;
                        config.mode = if mock { Mode::Mock } else { Mode::Passthrough };
                        config.capture_enabled = !mock;
                    });
                }
            })
        };

        for _ in 0..500 {
            let snapshot = cell.snapshot();
            // mode and capture always change together
            assert_eq!(snapshot.mode == Mode::Mock, !snapshot.capture_enabled);
        }
        writer.join().unwrap();
    }
}
