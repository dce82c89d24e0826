//! Proxy module for intercepting LLM API requests
//!
//! This module implements the capture pipeline:
//! - Passthrough: stream to and from the upstream while capturing a bounded copy
//! - Mock: synthesize API-shaped responses locally
//! - Capture log: one JSON line per request and per response

pub mod admin;
pub mod capture;
pub mod capture_buffer;
pub mod error_response;
pub mod event_writer;
pub mod headers;
pub mod hot_path;
pub mod middleware;
pub mod mock;
pub mod service;
pub mod sse;
pub mod state;
pub mod streaming;
pub mod summary;
pub mod types;
pub mod url_resolver;

pub use capture::Recorder;
pub use event_writer::EventWriter;
pub use service::ProxyService;
pub use state::{ConfigCell, RuntimeConfig};
pub use types::{Mode, ProxyError, ProxyResult};
