// ============================================================================
// Axum Middleware
// ============================================================================
//
// - request_logging: Log all incoming requests
// - add_security_headers: Add security headers to responses
//
// ============================================================================

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::utils::add_security_headers as utils_add_security_headers;

/// Request logging middleware
pub async fn request_logging(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::debug!(
        method = %method,
        path = %path,
        "Incoming request"
    );

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

/// Add security headers to responses
pub async fn add_security_headers(req: Request, next: Next) -> Response {
    // Extract HTTPS status before moving req
    let is_https = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "https")
        .unwrap_or(false);

    let mut response = next.run(req).await;
    utils_add_security_headers(response.headers_mut(), is_https);
    response
}
