//! Capture events and the recorder that writes them
//!
//! Every inbound API request produces one `request` event and, once the
//! response is settled, one `response` event. Both share an
//! [`EventEnvelope`] built when the request arrives.

use crate::proxy::capture_buffer::CapturedBody;
use crate::proxy::event_writer::EventWriter;
use crate::proxy::state::ConfigCell;
use crate::proxy::summary::RequestSummary;
use crate::proxy::types::{Mode, Source, TraceId};
use chrono::{SecondsFormat, Utc};
use http::{Method, Uri};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fields common to both events of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub trace_id: TraceId,
    pub mode: Mode,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
}

impl EventEnvelope {
    pub fn new(trace_id: TraceId, mode: Mode, method: &Method, uri: &Uri) -> Self {
        Self {
            trace_id,
            mode,
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            query: parse_query(uri.query()),
        }
    }

    /// Stamp a request event
    pub fn request(&self, capture: RequestCapture) -> CaptureEvent {
        self.event(CapturePayload::Request(capture))
    }

    /// Stamp a response event
    pub fn response(&self, capture: ResponseCapture) -> CaptureEvent {
        self.event(CapturePayload::Response(Box::new(capture)))
    }

    fn event(&self, payload: CapturePayload) -> CaptureEvent {
        CaptureEvent {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            trace_id: self.trace_id.clone(),
            mode: self.mode,
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            payload,
        }
    }
}

/// Decode a query string into a flat map; repeated keys keep the last value
pub fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(query) = query else {
        return out;
    };
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(decode_component(key), decode_component(value));
    }
    out
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// One line of the capture log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    pub ts: String,
    pub trace_id: TraceId,
    pub mode: Mode,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    #[serde(flatten)]
    pub payload: CapturePayload,
}

/// Direction-specific part of a capture event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum CapturePayload {
    Request(RequestCapture),
    Response(Box<ResponseCapture>),
}

/// What the sidecar saw arrive
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCapture {
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or the raw text when it did not parse
    pub body: Value,
    pub body_sha256: String,
    pub summary: RequestSummary,
}

/// What the sidecar sent back, and how it went
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCapture {
    pub source: Source,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseCapture {
    pub fn new(source: Source, status: u16) -> Self {
        Self {
            source,
            status,
            upstream_url: None,
            duration_ms: None,
            headers: None,
            body: None,
            body_sha256: None,
            body_bytes: None,
            body_truncated: None,
            stream: None,
            response: None,
            response_sha256: None,
            response_preview: None,
            error: None,
        }
    }

    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Attach a captured body; text and digest only when capture kept bytes
    pub fn with_body(mut self, body: &CapturedBody) -> Self {
        if body.enabled {
            self.body = Some(body.text());
            self.body_sha256 = Some(body.fingerprint());
        }
        self.body_bytes = Some(body.total_bytes);
        self.body_truncated = Some(body.truncated);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_response(mut self, response: Value, sha256: String) -> Self {
        self.response = Some(response);
        self.response_sha256 = Some(sha256);
        self
    }

    pub fn with_response_sha256(mut self, sha256: String) -> Self {
        self.response_sha256 = Some(sha256);
        self
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.response_preview = Some(preview.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Serializes capture events and hands them to the writer
///
/// Capture gating and the log path are read from the configuration current
/// at emission time.
#[derive(Debug, Clone)]
pub struct Recorder {
    config: Arc<ConfigCell>,
    writer: EventWriter,
}

impl Recorder {
    pub fn new(config: Arc<ConfigCell>, writer: EventWriter) -> Self {
        Self { config, writer }
    }

    pub fn record(&self, event: &CaptureEvent) {
        let snapshot = self.config.snapshot();
        if !snapshot.capture_enabled {
            return;
        }
        match serde_json::to_string(event) {
            Ok(line) => self.writer.append(&snapshot.log_file_path, line),
            Err(e) => debug!(error = %e, trace_id = %event.trace_id, "unserializable capture event"),
        }
    }

    /// Wait for every recorded event to reach the log
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::capture_buffer::BoundedCaptureBuffer;
    use crate::proxy::state::RuntimeConfig;
    use crate::proxy::summary::summarize;
    use crate::proxy::types::MaxCaptureBytes;
    use serde_json::json;

    fn envelope(uri: &str) -> EventEnvelope {
        EventEnvelope::new(
            TraceId::new("ctx_test".to_string()),
            Mode::Passthrough,
            &Method::POST,
            &uri.parse().unwrap(),
        )
    }

    #[test]
    fn query_decodes_plus_and_keeps_last_value() {
        let query = parse_query(Some("a=1&b=hello+world&a=2&c=%2Fx&flag"));

        assert_eq!(query.get("a").unwrap(), "2");
        assert_eq!(query.get("b").unwrap(), "hello world");
        assert_eq!(query.get("c").unwrap(), "/x");
        assert_eq!(query.get("flag").unwrap(), "");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn request_event_shape() {
        let env = envelope("/v1/chat/completions?x=1");
        let payload = json!({"messages": []});
        let summary = summarize(env.trace_id.clone(), &env.path, Some(&payload), "");
        let event = env.request(RequestCapture {
            headers: BTreeMap::from([("authorization".to_string(), "[REDACTED]".to_string())]),
            body: payload,
            body_sha256: "abc".to_string(),
            summary,
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["direction"], "request");
        assert_eq!(json["traceId"], "ctx_test");
        assert_eq!(json["mode"], "passthrough");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/v1/chat/completions");
        assert_eq!(json["query"]["x"], "1");
        assert_eq!(json["bodySha256"], "abc");
        assert_eq!(json["summary"]["route"], "/v1/chat/completions");
        assert!(json["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn response_event_omits_unset_fields() {
        let event = envelope("/v1/models").response(
            ResponseCapture::new(Source::Passthrough, 502).with_error("missing_upstream_base_url"),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["direction"], "response");
        assert_eq!(json["source"], "passthrough");
        assert_eq!(json["status"], 502);
        assert_eq!(json["error"], "missing_upstream_base_url");
        assert!(json.get("body").is_none());
        assert!(json.get("durationMs").is_none());
    }

    #[test]
    fn disabled_capture_body_keeps_counts_only() {
        let mut buffer = BoundedCaptureBuffer::new(MaxCaptureBytes::default(), false);
        buffer.push(b"data");
        let capture = ResponseCapture::new(Source::Passthrough, 200).with_body(&buffer.finish());

        assert!(capture.body.is_none());
        assert!(capture.body_sha256.is_none());
        assert_eq!(capture.body_bytes, Some(4));
        assert_eq!(capture.body_truncated, Some(false));
    }

    #[tokio::test]
    async fn recorder_respects_capture_toggle_at_emission() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let cell = Arc::new(ConfigCell::new(RuntimeConfig::new(&path)));
        let recorder = Recorder::new(Arc::clone(&cell), EventWriter::spawn());
        let env = envelope("/v1/models");

        recorder.record(&env.response(ResponseCapture::new(Source::Mock, 200)));
        cell.update(|config| config.capture_enabled = false);
        recorder.record(&env.response(ResponseCapture::new(Source::Mock, 201)));
        recorder.flush().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"status\":200"));
    }
}
