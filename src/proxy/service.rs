//! Main proxy service implementation
//!
//! The `ProxyService` is the HTTP entry point of the sidecar. A single
//! fallback handler dispatches every request:
//!
//! - `GET /healthz` answers directly
//! - `/admin/*` goes to the admin surface
//! - `/v1/*` runs the capture pipeline and then either the mock responder or
//!   the passthrough proxy, depending on the current mode
//! - anything else is a JSON 404
//!
//! ```rust,ignore
//! let cell = Arc::new(ConfigCell::new(RuntimeConfig::new("./logs/modelbox.jsonl")));
//! let service = ProxyService::new(cell, EventWriter::spawn(), std::env::current_dir()?)?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8787").await?;
//! axum::serve(listener, service.into_router()).await?;
//! ```

use crate::error::Result;
use crate::proxy::admin;
use crate::proxy::capture::{EventEnvelope, Recorder, RequestCapture};
use crate::proxy::error_response::ErrorEnvelope;
use crate::proxy::event_writer::EventWriter;
use crate::proxy::headers::{fingerprint, paths, redact_for_capture};
use crate::proxy::hot_path::{Forwarded, PassthroughProxy};
use crate::proxy::middleware::logging_middleware;
use crate::proxy::mock::MockResponder;
use crate::proxy::state::ConfigCell;
use crate::proxy::summary::summarize;
use crate::proxy::types::{Mode, ProxyError, ProxyResult, TraceId, SERVICE_NAME};
use axum::{
    body::Body,
    extract::{Request, State},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// The sidecar's request dispatcher and its collaborators
#[derive(Debug)]
pub struct ProxyService {
    config: Arc<ConfigCell>,
    recorder: Recorder,
    passthrough: PassthroughProxy,
    base_dir: PathBuf,
}

impl ProxyService {
    /// Create the service
    ///
    /// `base_dir` resolves relative log paths set through the admin surface.
    pub fn new(config: Arc<ConfigCell>, writer: EventWriter, base_dir: PathBuf) -> Result<Self> {
        let recorder = Recorder::new(Arc::clone(&config), writer);
        let passthrough = PassthroughProxy::new(recorder.clone())?;
        Ok(Self {
            config,
            recorder,
            passthrough,
            base_dir,
        })
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Create an Axum router for the proxy service with middleware
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(self))
            .layer(middleware::from_fn(logging_middleware))
    }

    async fn admin(&self, request: Request) -> ProxyResult<Response> {
        let snapshot = self.config.snapshot();
        if let Err(e) = admin::authorize(request.headers(), snapshot.admin_token.as_ref()) {
            return Ok(e.into_response());
        }

        let (parts, body) = request.into_parts();
        let body = if parts.method == Method::POST {
            read_body(body).await?
        } else {
            Bytes::new()
        };

        let result = admin::handle(
            &self.config,
            &self.base_dir,
            &parts.method,
            parts.uri.path(),
            &body,
        );
        Ok(match result {
            Ok(view) => Json(view).into_response(),
            Err(e) => e.into_response(),
        })
    }

    async fn api(&self, request: Request) -> ProxyResult<Response> {
        let trace_id = TraceId::generate();
        let span = info_span!("api_request", trace_id = %trace_id);
        self.capture_and_respond(trace_id, request)
            .instrument(span)
            .await
    }

    async fn capture_and_respond(&self, trace_id: TraceId, request: Request) -> ProxyResult<Response> {
        let config = self.config.snapshot();
        let (parts, body) = request.into_parts();
        let envelope = EventEnvelope::new(trace_id.clone(), config.mode, &parts.method, &parts.uri);

        let body = if parts.method == Method::GET || parts.method == Method::HEAD {
            Bytes::new()
        } else {
            read_body(body).await?
        };
        let text = String::from_utf8_lossy(&body);
        let parsed: Option<Value> = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };
        let route = parts.uri.path();
        let summary = summarize(trace_id, route, parsed.as_ref(), &text);
        debug!(
            route,
            model = summary.model.as_deref(),
            messages = summary.message_count,
            "request summarized"
        );

        self.recorder.record(&envelope.request(RequestCapture {
            headers: redact_for_capture(&parts.headers, config.redact_auth_headers),
            body: parsed
                .clone()
                .unwrap_or_else(|| Value::String(text.clone().into_owned())),
            body_sha256: fingerprint(&body),
            summary: summary.clone(),
        }));

        match config.mode {
            Mode::Mock => {
                let reply = MockResponder::new(parsed.as_ref(), &summary).respond(route)?;
                self.recorder.record(&envelope.response(reply.capture));
                Ok(reply.response)
            }
            Mode::Passthrough => {
                let forwarded = Forwarded {
                    method: &parts.method,
                    uri: &parts.uri,
                    headers: &parts.headers,
                    body: body.clone(),
                };
                Ok(self.passthrough.forward(envelope, config, forwarded).await)
            }
        }
    }

    fn health(&self) -> Response {
        let snapshot = self.config.snapshot();
        Json(json!({
            "ok": true,
            "service": SERVICE_NAME,
            "mode": snapshot.mode,
            "capture": snapshot.capture_enabled,
        }))
        .into_response()
    }
}

/// Axum fallback handler routing every request
async fn dispatch(
    State(service): State<Arc<ProxyService>>,
    request: Request<Body>,
) -> ProxyResult<Response> {
    let path = request.uri().path().to_string();

    if request.method() == Method::GET && path == paths::HEALTH {
        return Ok(service.health());
    }
    if path.starts_with(paths::ADMIN_PREFIX) {
        return service.admin(request).await;
    }
    if !path.starts_with(paths::API_PREFIX) {
        return Ok(ErrorEnvelope::not_found(format!("unknown path: {path}"))
            .into_response_with_status(StatusCode::NOT_FOUND));
    }

    service.api(request).await
}

async fn read_body(body: Body) -> ProxyResult<Bytes> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ProxyError::BodyRead(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::state::RuntimeConfig;
    use crate::proxy::types::AdminToken;
    use tower::ServiceExt;

    struct Harness {
        _dir: tempfile::TempDir,
        log: PathBuf,
        cell: Arc<ConfigCell>,
        recorder: Recorder,
        router: Router,
    }

    fn harness(configure: impl FnOnce(&mut RuntimeConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("capture.jsonl");
        let mut config = RuntimeConfig::new(&log);
        configure(&mut config);
        let cell = Arc::new(ConfigCell::new(config));
        let service =
            ProxyService::new(Arc::clone(&cell), EventWriter::spawn(), dir.path().to_path_buf())
                .unwrap();
        let recorder = service.recorder().clone();
        Harness {
            _dir: dir,
            log,
            cell,
            recorder,
            router: service.into_router(),
        }
    }

    async fn call(router: &Router, request: http::Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> http::Request<Body> {
        http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> http::Request<Body> {
        http::Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn events(h: &Harness) -> Vec<Value> {
        h.recorder.flush().await;
        std::fs::read_to_string(&h.log)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_reports_mode_and_capture() {
        let h = harness(|config| config.mode = Mode::Mock);
        let (status, body) = call(&h.router, get("/healthz")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"ok": true, "service": "modelbox", "mode": "mock", "capture": true})
        );
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let h = harness(|_| {});
        let (status, body) = call(&h.router, get("/nope")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "not_found");
        assert_eq!(body["error"]["message"], "unknown path: /nope");
        assert!(events(&h).await.is_empty());
    }

    #[tokio::test]
    async fn admin_requires_token_when_configured() {
        let h = harness(|config| {
            config.admin_token = Some(AdminToken::try_new("letmein").unwrap());
        });

        let (status, body) = call(&h.router, get("/admin/state")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "unauthorized"}));

        let request = http::Request::get("/admin/state")
            .header("x-modelbox-token", "letmein")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "passthrough");
        assert_eq!(body["hasUpstreamApiKey"], false);
    }

    #[tokio::test]
    async fn admin_post_switches_mode_and_rejects_bad_json() {
        let h = harness(|_| {});

        let (status, body) = call(&h.router, post("/admin/state", r#"{"mode":"mock"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "mock");
        assert_eq!(h.cell.snapshot().mode, Mode::Mock);

        let (status, body) = call(&h.router, post("/admin/state", r#"{"mode":"bogus"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "mock");

        let (status, body) = call(&h.router, post("/admin/state", "{oops")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "invalid_json"}));

        let (status, body) = call(&h.router, get("/admin/elsewhere")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "not_found"}));
    }

    #[tokio::test]
    async fn mock_request_emits_request_and_response_events() {
        let h = harness(|config| config.mode = Mode::Mock);
        let request = http::Request::post("/v1/chat/completions?debug=1")
            .header("authorization", "Bearer caller-secret")
            .body(Body::from(
                r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#,
            ))
            .unwrap();

        let (status, body) = call(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["object"], "chat.completion");

        let events = events(&h).await;
        assert_eq!(events.len(), 2);
        let (req, resp) = (&events[0], &events[1]);
        assert_eq!(req["direction"], "request");
        assert_eq!(resp["direction"], "response");
        assert_eq!(req["traceId"], resp["traceId"]);
        assert_eq!(req["query"]["debug"], "1");
        assert_eq!(req["headers"]["authorization"], "[REDACTED]");
        assert_eq!(req["summary"]["roles"]["user"], 1);
        assert_eq!(req["body"]["model"], "m");
        assert_eq!(resp["source"], "mock");
        assert_eq!(resp["mode"], "mock");
        assert!(!events_contain(&events, "caller-secret"));
    }

    #[tokio::test]
    async fn non_json_body_is_captured_as_text() {
        let h = harness(|config| config.mode = Mode::Mock);
        let (status, _) = call(&h.router, post("/v1/chat/completions", "plain words")).await;
        assert_eq!(status, StatusCode::OK);

        let events = events(&h).await;
        assert_eq!(events[0]["body"], "plain words");
        assert_eq!(events[0]["bodySha256"], fingerprint(b"plain words"));
        assert_eq!(events[0]["summary"]["messageCount"], 0);
    }

    #[tokio::test]
    async fn capture_disabled_writes_nothing() {
        let h = harness(|config| {
            config.mode = Mode::Mock;
            config.capture_enabled = false;
        });
        let (status, _) = call(&h.router, get("/v1/models")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(events(&h).await.is_empty());
    }

    fn events_contain(events: &[Value], needle: &str) -> bool {
        events.iter().any(|event| event.to_string().contains(needle))
    }
}
