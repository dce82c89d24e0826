//! Server-sent event framing for streamed mock responses

use crate::proxy::headers::{content_types, fingerprint, CACHE_CONTROL, CONTENT_TYPE};
use axum::body::Body;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use std::convert::Infallible;

/// Terminator payload ending every stream
pub const DONE: &str = "[DONE]";

/// One `data:` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    Done,
}

impl SseFrame {
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_string(value).map(Self::Data)
    }

    /// Wire form: `data: <payload>\n\n`
    pub fn encode(&self) -> Bytes {
        let payload = match self {
            Self::Data(json) => json.as_str(),
            Self::Done => DONE,
        };
        let mut buf = BytesMut::with_capacity(payload.len() + 8);
        buf.extend_from_slice(b"data: ");
        buf.extend_from_slice(payload.as_bytes());
        buf.extend_from_slice(b"\n\n");
        buf.freeze()
    }
}

/// A fully built event stream, ready to send
#[derive(Debug, Clone)]
pub struct EventStream {
    chunks: Vec<Bytes>,
}

impl EventStream {
    pub fn new(frames: &[SseFrame]) -> Self {
        Self {
            chunks: frames.iter().map(SseFrame::encode).collect(),
        }
    }

    /// Digest of every byte the caller will receive
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.chunks.concat())
    }

    /// Response sending one body chunk per frame
    pub fn into_response(self) -> Response {
        let body = Body::from_stream(stream::iter(
            self.chunks.into_iter().map(Ok::<_, Infallible>),
        ));
        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(content_types::TEXT_EVENT_STREAM),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(content_types::NO_CACHE));
        response
    }
}
