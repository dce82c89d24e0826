//! Shared helpers for integration tests
#![allow(dead_code)]

use axum::body::Body;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use modelbox::proxy::{ConfigCell, EventWriter, ProxyService, Recorder, RuntimeConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Serve `router` on an ephemeral local port
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A sidecar router with its own capture log
pub struct Sidecar {
    _dir: TempDir,
    pub log: PathBuf,
    pub config: Arc<ConfigCell>,
    pub recorder: Recorder,
    router: Router,
}

impl Sidecar {
    pub fn new(configure: impl FnOnce(&mut RuntimeConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("capture.jsonl");
        let mut config = RuntimeConfig::new(&log);
        configure(&mut config);
        let config = Arc::new(ConfigCell::new(config));
        let service = ProxyService::new(
            Arc::clone(&config),
            EventWriter::spawn(),
            dir.path().to_path_buf(),
        )
        .unwrap();
        let recorder = service.recorder().clone();

        Self {
            _dir: dir,
            log,
            config,
            recorder,
            router: service.into_router(),
        }
    }

    pub async fn send(&self, request: http::Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Everything written to the capture log so far
    pub async fn events(&self) -> Vec<Value> {
        self.recorder.flush().await;
        read_events(&self.log)
    }

    /// Wait until at least `count` events exist; response events of streamed
    /// bodies are written by a background task after the body ends
    pub async fn wait_for_events(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let events = self.events().await;
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} capture events, found {:?}", self.events().await);
    }
}

pub fn read_events(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

pub async fn body_bytes(response: Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn json_request(method: http::Method, uri: &str, body: &Value) -> http::Request<Body> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
