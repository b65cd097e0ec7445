//! Per-request access log.

use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

/// axum middleware logging method, uri, status, latency, and body size.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let resp = next.run(req).await;

    let size = resp.body().size_hint().exact();
    info!(
        %method,
        %uri,
        status = resp.status().as_u16(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        size,
        "request served"
    );
    resp
}
