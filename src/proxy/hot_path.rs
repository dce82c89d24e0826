//! Hot path implementation for passthrough forwarding
//!
//! The upstream response is relayed as soon as its status line arrives. The
//! body streams to the caller through a [`CapturingStream`]; a separate task
//! builds the bounded capture copy and writes the response event once the
//! stream settles, so capture work never sits between upstream and caller.
//!
//! Exchanges that carry no body (HEAD, 1xx, 204, 304) are recorded as soon as
//! the status line arrives. With capture off the body is relayed untapped.

use crate::proxy::capture::{EventEnvelope, Recorder, ResponseCapture};
use crate::proxy::capture_buffer::BoundedCaptureBuffer;
use crate::proxy::headers::{filter_hop_by_hop, forward_headers, redact_for_capture};
use crate::proxy::state::RuntimeConfig;
use crate::proxy::streaming::{collect_tap, CapturingStream, StreamEnd};
use crate::proxy::types::{ProxyError, Source};
use crate::proxy::url_resolver::UrlResolver;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Error recorded when passthrough is attempted without an upstream
pub const MISSING_UPSTREAM: &str = "missing_upstream_base_url";

/// Error recorded when the caller went away before the body finished
pub const CLIENT_DISCONNECTED: &str = "client disconnected before response completed";

/// Inbound request data the passthrough path needs
#[derive(Debug, Clone)]
pub struct Forwarded<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
}

/// Forwards requests to the configured upstream
#[derive(Clone, Debug)]
pub struct PassthroughProxy {
    client: reqwest::Client,
    recorder: Recorder,
}

impl PassthroughProxy {
    /// Build the proxy with a client that never follows redirects
    pub fn new(recorder: Recorder) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().redirect(Policy::none()).build()?;
        Ok(Self { client, recorder })
    }

    /// Forward one request and relay the upstream response
    #[instrument(skip_all, fields(trace_id = %envelope.trace_id, path = %envelope.path))]
    pub async fn forward(
        &self,
        envelope: EventEnvelope,
        config: Arc<RuntimeConfig>,
        request: Forwarded<'_>,
    ) -> Response {
        let Some(base) = config.upstream_base_url.as_ref() else {
            warn!("passthrough requested but no upstream is configured");
            self.record_failure(
                &envelope,
                ResponseCapture::new(Source::Passthrough, 502),
                MISSING_UPSTREAM,
            );
            return ProxyError::Misconfigured.into_response();
        };

        let target = match UrlResolver::merge(base, request.uri) {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "could not build upstream URL");
                self.record_failure(
                    &envelope,
                    ResponseCapture::new(Source::Passthrough, 502),
                    e.to_string(),
                );
                return e.into_response();
            }
        };

        let api_key: Option<&str> = config.upstream_api_key.as_ref().map(AsRef::as_ref);
        let mut outgoing = self
            .client
            .request(request.method.clone(), target.as_str())
            .headers(forward_headers(request.headers, api_key));
        if request.method != Method::GET && request.method != Method::HEAD {
            outgoing = outgoing.body(request.body);
        }

        let started = Instant::now();
        let upstream = match outgoing.send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, upstream_url = %target, "upstream unreachable");
                self.record_failure(
                    &envelope,
                    ResponseCapture::new(Source::Passthrough, 502)
                        .with_upstream_url(target)
                        .with_duration(started.elapsed()),
                    message.clone(),
                );
                return ProxyError::UpstreamUnreachable(message).into_response();
            }
        };

        let status = upstream.status();
        let response_headers = filter_hop_by_hop(upstream.headers());
        let captured_headers = redact_for_capture(&response_headers, config.redact_auth_headers);
        debug!(status = status.as_u16(), upstream_url = %target, "upstream responded");

        if is_bodyless(request.method, status) {
            drop(upstream);
            let empty = BoundedCaptureBuffer::new(config.max_capture_bytes, config.capture_enabled);
            self.recorder.record(
                &envelope.response(
                    ResponseCapture::new(Source::Passthrough, status.as_u16())
                        .with_upstream_url(target)
                        .with_duration(started.elapsed())
                        .with_headers(captured_headers)
                        .with_body(&empty.finish()),
                ),
            );
            return relay(status, response_headers, Body::empty());
        }

        if !config.capture_enabled {
            return relay(
                status,
                response_headers,
                Body::from_stream(upstream.bytes_stream()),
            );
        }

        let (body, tap) = CapturingStream::new(upstream.bytes_stream());
        let buffer = BoundedCaptureBuffer::new(config.max_capture_bytes, config.capture_enabled);
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            let outcome = collect_tap(tap, buffer).await;
            let capture = ResponseCapture::new(Source::Passthrough, status.as_u16())
                .with_upstream_url(target)
                .with_duration(started.elapsed())
                .with_headers(captured_headers)
                .with_body(&outcome.body);
            let capture = match outcome.end {
                StreamEnd::Completed => {
                    debug!(
                        trace_id = %envelope.trace_id,
                        bytes = outcome.body.total_bytes,
                        truncated = outcome.body.truncated,
                        "response stream completed"
                    );
                    capture
                }
                StreamEnd::Failed(message) => {
                    warn!(trace_id = %envelope.trace_id, error = %message, "upstream stream failed");
                    capture.with_error(message)
                }
                StreamEnd::Abandoned => {
                    debug!(trace_id = %envelope.trace_id, "caller closed the response early");
                    capture.with_error(CLIENT_DISCONNECTED)
                }
            };
            recorder.record(&envelope.response(capture));
        });

        relay(status, response_headers, Body::from_stream(body))
    }

    fn record_failure(
        &self,
        envelope: &EventEnvelope,
        capture: ResponseCapture,
        error: impl Into<String>,
    ) {
        self.recorder.record(&envelope.response(capture.with_error(error)));
    }
}

/// Whether the exchange can never carry a response body
fn is_bodyless(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

fn relay(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::event_writer::EventWriter;
    use crate::proxy::state::ConfigCell;
    use crate::proxy::types::{Mode, TraceId, UpstreamBaseUrl};
    use http_body_util::BodyExt;
    use rstest::rstest;
    use serde_json::Value;

    #[rstest]
    #[case::head(Method::HEAD, StatusCode::OK, true)]
    #[case::no_content(Method::GET, StatusCode::NO_CONTENT, true)]
    #[case::not_modified(Method::GET, StatusCode::NOT_MODIFIED, true)]
    #[case::ok(Method::GET, StatusCode::OK, false)]
    #[case::created(Method::POST, StatusCode::CREATED, false)]
    fn bodyless_exchanges(#[case] method: Method, #[case] status: StatusCode, #[case] expected: bool) {
        assert_eq!(is_bodyless(&method, status), expected);
    }

    struct Harness {
        _dir: tempfile::TempDir,
        log: std::path::PathBuf,
        cell: Arc<ConfigCell>,
        proxy: PassthroughProxy,
    }

    fn harness(upstream: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.jsonl");
        let mut config = RuntimeConfig::new(&log);
        config.upstream_base_url = upstream.map(|url| UpstreamBaseUrl::try_new(url).unwrap());
        let cell = Arc::new(ConfigCell::new(config));
        let recorder = Recorder::new(Arc::clone(&cell), EventWriter::spawn());
        let proxy = PassthroughProxy::new(recorder).unwrap();
        Harness {
            _dir: dir,
            log,
            cell,
            proxy,
        }
    }

    fn envelope(uri: &Uri) -> EventEnvelope {
        EventEnvelope::new(
            TraceId::new("ctx_hot".to_string()),
            Mode::Passthrough,
            &Method::POST,
            uri,
        )
    }

    async fn events(h: &Harness) -> Vec<Value> {
        h.proxy.recorder.flush().await;
        std::fs::read_to_string(&h.log)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn missing_upstream_is_misconfigured() {
        let h = harness(None);
        let uri: Uri = "/v1/chat/completions".parse().unwrap();
        let headers = HeaderMap::new();
        let response = h
            .proxy
            .forward(
                envelope(&uri),
                h.cell.snapshot(),
                Forwarded {
                    method: &Method::POST,
                    uri: &uri,
                    headers: &headers,
                    body: Bytes::new(),
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "misconfigured");

        let events = events(&h).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["status"], 502);
        assert_eq!(events[0]["error"], MISSING_UPSTREAM);
        assert_eq!(events[0]["source"], "passthrough");
    }

    #[tokio::test]
    async fn refused_connection_is_upstream_error() {
        let h = harness(Some("http://127.0.0.1:1"));
        let uri: Uri = "/v1/models".parse().unwrap();
        let headers = HeaderMap::new();
        let response = h
            .proxy
            .forward(
                envelope(&uri),
                h.cell.snapshot(),
                Forwarded {
                    method: &Method::GET,
                    uri: &uri,
                    headers: &headers,
                    body: Bytes::new(),
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "upstream_error");

        let events = events(&h).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["upstreamUrl"], "http://127.0.0.1:1/v1/models");
        assert!(events[0]["durationMs"].is_u64());
        assert!(events[0]["error"].is_string());
    }
}
