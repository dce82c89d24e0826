//! Process settings loaded at startup
//!
//! Sources, later ones winning:
//! 1. an optional `modelbox.{toml,yaml,json,...}` file in the working directory
//! 2. legacy `SIDECAR_*` environment variables
//! 3. `MODELBOX_*` environment variables
//!
//! Empty variables are skipped, so an empty `MODELBOX_X` falls back to
//! `SIDECAR_X`. Every value is read as text and validated here; a value that
//! does not validate keeps its default.

use crate::proxy::state::{resolve_path, RuntimeConfig, DEFAULT_LOG_FILE};
use crate::proxy::types::{AdminToken, ApiKey, MaxCaptureBytes, Mode, UpstreamBaseUrl};
use crate::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Primary environment prefix
pub const ENV_PREFIX: &str = "MODELBOX";

/// Legacy environment prefix, overridden by [`ENV_PREFIX`]
pub const LEGACY_ENV_PREFIX: &str = "SIDECAR";

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;

/// Format of the diagnostic log written to stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub runtime: RuntimeConfig,
}

/// Settings exactly as the sources provide them
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    bind: Option<String>,
    port: Option<String>,
    mode: Option<String>,
    capture: Option<String>,
    upstream_base_url: Option<String>,
    upstream_api_key: Option<String>,
    admin_token: Option<String>,
    redact_auth_headers: Option<String>,
    log_file: Option<String>,
    max_capture_bytes: Option<String>,
    log_format: Option<String>,
}

impl Settings {
    /// Load from the optional settings file and the process environment
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()?;
        let config = Config::builder()
            .add_source(File::with_name("modelbox").required(false))
            .add_source(env_source(LEGACY_ENV_PREFIX, None))
            .add_source(env_source(ENV_PREFIX, None))
            .build()?;
        Ok(Self::from_raw(config.try_deserialize()?, &base_dir))
    }

    /// Load from an explicit set of environment variables
    pub fn from_vars<I, K, V>(vars: I, base_dir: &Path) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: config::Map<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        let config = Config::builder()
            .add_source(env_source(LEGACY_ENV_PREFIX, Some(vars.clone())))
            .add_source(env_source(ENV_PREFIX, Some(vars)))
            .build()?;
        Ok(Self::from_raw(config.try_deserialize()?, base_dir))
    }

    fn from_raw(raw: RawSettings, base_dir: &Path) -> Self {
        let mut runtime = RuntimeConfig::new(resolve_path(
            non_empty(raw.log_file.as_deref()).unwrap_or(DEFAULT_LOG_FILE),
            base_dir,
        ));

        if let Some(value) = non_empty(raw.mode.as_deref()) {
            runtime.mode = value.parse().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to passthrough mode");
                Mode::Passthrough
            });
        }
        runtime.capture_enabled = parse_bool(raw.capture.as_deref(), true);
        runtime.redact_auth_headers = parse_bool(raw.redact_auth_headers.as_deref(), true);

        if let Some(value) = non_empty(raw.upstream_base_url.as_deref()) {
            match UpstreamBaseUrl::try_new(value) {
                Ok(url) => runtime.upstream_base_url = Some(url),
                Err(e) => warn!(error = %e, "ignoring upstream base URL without an http(s) scheme"),
            }
        }
        runtime.upstream_api_key = raw
            .upstream_api_key
            .and_then(|key| ApiKey::try_new(key).ok());
        runtime.admin_token = raw
            .admin_token
            .and_then(|token| AdminToken::try_new(token).ok());
        if let Some(max) = parse_positive::<usize>(raw.max_capture_bytes.as_deref()) {
            runtime.max_capture_bytes = MaxCaptureBytes::try_new(max).unwrap_or_default();
        }

        Self {
            bind: non_empty(raw.bind.as_deref())
                .unwrap_or(DEFAULT_BIND)
                .to_string(),
            port: parse_positive(raw.port.as_deref()).unwrap_or(DEFAULT_PORT),
            log_format: non_empty(raw.log_format.as_deref())
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            runtime,
        }
    }
}

fn env_source(prefix: &str, vars: Option<config::Map<String, String>>) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("_")
        .ignore_empty(true)
        .source(vars)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Interpret a flag; unrecognised values keep `default`
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match non_empty(value).map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Parse a strictly positive integer
pub fn parse_positive<T>(value: Option<&str>) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    non_empty(value)
        .and_then(|value| value.parse::<T>().ok())
        .filter(|parsed| *parsed > T::default())
}
