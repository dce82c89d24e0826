//! Middleware implementations for the proxy service

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info};

/// Logging middleware - logs request/response details with timing
///
/// For streamed responses the duration covers time to first byte, since the
/// body is still flowing when the handler returns.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let uri = request.uri().clone();

    debug!(method = %method, path = %uri.path(), "Incoming request");

    let response = next.run(request).await;
    let duration = start.elapsed();

    info!(
        method = %method,
        path = %uri.path(),
        status = response.status().as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}
